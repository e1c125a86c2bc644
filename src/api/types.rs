//! Wire types for the WireGuardService RPC surface
//!
//! Request fields are optional at the serde level so that missing fields can
//! be reported as `invalid_argument` with a useful message instead of a
//! generic decode failure.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::types::Peer;

// =============================================================================
// SCALARS
// =============================================================================

/// Integer that may arrive as a JSON number or as a decimal string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireInt {
    Int(i64),
    Unsigned(u64),
    Text(String),
}

impl WireInt {
    /// Values beyond the `i64` range saturate to `i64::MAX` / `i64::MIN`
    pub fn to_i64(&self, field: &str) -> Result<i64, RpcError> {
        match self {
            WireInt::Int(value) => Ok(*value),
            WireInt::Unsigned(value) => Ok(i64::try_from(*value).unwrap_or(i64::MAX)),
            WireInt::Text(text) => parse_decimal(text.trim()).ok_or_else(|| {
                RpcError::invalid_argument(format!("{} must be an integer, got {:?}", field, text))
            }),
        }
    }
}

fn parse_decimal(text: &str) -> Option<i64> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }

    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // Only overflow gets here
    Some(if negative { i64::MIN } else { i64::MAX })
}

impl From<i64> for WireInt {
    fn from(value: i64) -> Self {
        WireInt::Int(value)
    }
}

// =============================================================================
// REQUESTS & RESPONSES
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListPeersRequest {
    pub offset: Option<WireInt>,
    pub limit: Option<WireInt>,
    pub order: Option<String>,

    /// Restrict the listing to these keys; absent lists every peer
    pub public_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPeersResponse {
    pub peers: Vec<Peer>,
    pub total_count: u64,
}

/// Peer fields accepted on creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerInput {
    pub public_key: Option<String>,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub name: Option<String>,
    pub persistent_keepalive: Option<WireInt>,
    pub preshared_key: Option<String>,
}

/// Peer fields accepted on update; absent fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialPeerInput {
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Option<Vec<String>>,

    /// `null` clears the endpoint, absence keeps it
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub endpoint: Option<Option<String>>,

    pub name: Option<String>,
    pub persistent_keepalive: Option<WireInt>,

    /// `null` removes the preshared key
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub preshared_key: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddPeerRequest {
    pub peer: Option<PeerInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPeerResponse {
    pub peer: Peer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemovePeerRequest {
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovePeerResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePeerRequest {
    pub public_key: Option<String>,
    pub fields: Option<PartialPeerInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePeerResponse {
    pub peer: Peer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetPeerRequest {
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPeerResponse {
    pub peer: Peer,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Protocol error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    Malformed,
    NotFound,
    BadRoute,
    AlreadyExists,
    DeadlineExceeded,
    Internal,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::InvalidArgument,
        ErrorCode::Malformed,
        ErrorCode::NotFound,
        ErrorCode::BadRoute,
        ErrorCode::AlreadyExists,
        ErrorCode::DeadlineExceeded,
        ErrorCode::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Malformed => "malformed",
            ErrorCode::NotFound => "not_found",
            ErrorCode::BadRoute => "bad_route",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument | ErrorCode::Malformed => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound | ErrorCode::BadRoute => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error envelope returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{}: {msg}", .code.as_str())]
pub struct RpcError {
    pub code: ErrorCode,
    pub msg: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn bad_route(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRoute, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, msg)
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorCode::DeadlineExceeded, "request deadline exceeded")
    }

    /// Generic failure; details stay in the server log
    pub fn internal() -> Self {
        Self::new(ErrorCode::Internal, "internal error")
    }
}
