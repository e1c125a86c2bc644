//! Core peer types
//!
//! The peer record shared by the store, the pagination engine and the RPC layer.
//! Wire conventions follow WireGuard: base64 keys, CIDR strings and
//! `host:port` endpoints.

use base64::Engine;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// Length of a WireGuard Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// Maximum length of a peer label
pub const MAX_NAME_LEN: usize = 64;

/// UTC timestamp, RFC 3339 on the wire
pub type Timestamp = DateTime<Utc>;

/// Insertion sequence number assigned by the store
pub type SeqNo = u64;

/// Errors produced while turning wire strings into peer fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerParseError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("invalid preshared key: {0}")]
    InvalidPresharedKey(String),

    #[error("invalid CIDR range {0:?}")]
    InvalidCidr(String),

    #[error("duplicate allowed IP {0}")]
    DuplicateAllowedIp(String),

    #[error("invalid endpoint {0:?}, expected host:port")]
    InvalidEndpoint(String),

    #[error("name longer than {MAX_NAME_LEN} characters")]
    NameTooLong,
}

// =============================================================================
// PUBLIC KEY
// =============================================================================

/// WireGuard public key, the primary key of the registry
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl FromStr for PublicKey {
    type Err = PeerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(Self).map_err(PeerParseError::InvalidKey)
    }
}

/// Decode a standard base64 WireGuard key
fn decode_key(s: &str) -> Result<[u8; KEY_LEN], String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| e.to_string())?;

    <[u8; KEY_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::engine::general_purpose::STANDARD.encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PRESHARED KEY
// =============================================================================

/// Optional symmetric key mixed into the handshake
///
/// Never rendered in clear text by `Debug` and never sent back over the API.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl FromStr for PresharedKey {
    type Err = PeerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_key(s).map(Self).map_err(PeerParseError::InvalidPresharedKey)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(<redacted>)")
    }
}

// Stored as raw bytes; only the store serializes it
impl Serialize for PresharedKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PresharedKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <[u8; KEY_LEN]>::deserialize(deserializer).map(Self)
    }
}

// =============================================================================
// ENDPOINT
// =============================================================================

/// Remote address of a peer: an IP literal or DNS name plus a UDP port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = PeerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeerParseError::InvalidEndpoint(s.to_string());

        if let Ok(addr) = s.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(invalid());
            }
            return Ok(addr.into());
        }

        // Hostname form; IPv6 literals must be bracketed and are handled above
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let valid_host = !host.is_empty()
            && host.len() <= 253
            && host
                .split('.')
                .all(|label| {
                    !label.is_empty()
                        && label.len() <= 63
                        && !label.starts_with('-')
                        && !label.ends_with('-')
                        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                });

        // A final label of only digits is not a DNS name
        let numeric_tld = host
            .rsplit('.')
            .next()
            .map_or(false, |tld| tld.chars().all(|c| c.is_ascii_digit()));

        if !valid_host || numeric_tld || port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// =============================================================================
// PEER
// =============================================================================

/// One VPN endpoint known to the registry
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Primary key, immutable after creation
    pub public_key: PublicKey,

    /// Routable ranges for this peer, in the order they were supplied
    #[serde(rename = "allowedIPs")]
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub allowed_ips: Vec<IpNetwork>,

    /// Last known remote address, updated on roaming
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub endpoint: Option<Endpoint>,

    /// Set by the handshake monitor, never by the RPC surface
    pub last_handshake: Option<Timestamp>,

    pub created_at: Timestamp,

    /// Human readable label
    pub name: String,

    /// Keepalive interval in seconds, 0 disables it
    pub persistent_keepalive: u16,

    /// Kept by the store, left out of every serialized form of `Peer`
    #[serde(skip)]
    pub preshared_key: Option<PresharedKey>,
}

/// Validated input for a new peer
#[derive(Debug, Clone, PartialEq)]
pub struct NewPeer {
    pub public_key: PublicKey,
    pub allowed_ips: Vec<IpNetwork>,
    pub endpoint: Option<Endpoint>,
    pub name: String,
    pub persistent_keepalive: u16,
    pub preshared_key: Option<PresharedKey>,
}

impl NewPeer {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            allowed_ips: Vec::new(),
            endpoint: None,
            name: String::new(),
            persistent_keepalive: 0,
            preshared_key: None,
        }
    }

    pub fn into_peer(self, created_at: Timestamp) -> Peer {
        Peer {
            public_key: self.public_key,
            allowed_ips: self.allowed_ips,
            endpoint: self.endpoint,
            last_handshake: None,
            created_at,
            name: self.name,
            persistent_keepalive: self.persistent_keepalive,
            preshared_key: self.preshared_key,
        }
    }
}

/// Partial update; `None` leaves a field untouched
///
/// `endpoint` and `preshared_key` are doubly optional so that an update can
/// clear them: `Some(None)` removes the value, `None` keeps it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerUpdate {
    pub allowed_ips: Option<Vec<IpNetwork>>,
    pub endpoint: Option<Option<Endpoint>>,
    pub name: Option<String>,
    pub persistent_keepalive: Option<u16>,
    pub preshared_key: Option<Option<PresharedKey>>,
}

impl PeerUpdate {
    pub fn is_empty(&self) -> bool {
        self.allowed_ips.is_none()
            && self.endpoint.is_none()
            && self.name.is_none()
            && self.persistent_keepalive.is_none()
            && self.preshared_key.is_none()
    }

    /// Apply the supplied fields. Key, creation time and handshake are never touched.
    pub fn apply_to(&self, peer: &mut Peer) {
        if let Some(ips) = &self.allowed_ips {
            peer.allowed_ips = ips.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            peer.endpoint = endpoint.clone();
        }
        if let Some(name) = &self.name {
            peer.name = name.clone();
        }
        if let Some(keepalive) = self.persistent_keepalive {
            peer.persistent_keepalive = keepalive;
        }
        if let Some(psk) = self.preshared_key {
            peer.preshared_key = psk;
        }
    }
}

/// Parse a list of CIDR strings, rejecting duplicates
pub fn parse_allowed_ips<S: AsRef<str>>(values: &[S]) -> Result<Vec<IpNetwork>, PeerParseError> {
    let mut seen = HashSet::with_capacity(values.len());
    let mut ips = Vec::with_capacity(values.len());

    for value in values {
        let value = value.as_ref().trim();
        let ip: IpNetwork = value
            .parse()
            .map_err(|_| PeerParseError::InvalidCidr(value.to_string()))?;

        if !seen.insert(ip) {
            return Err(PeerParseError::DuplicateAllowedIp(ip.to_string()));
        }
        ips.push(ip);
    }

    Ok(ips)
}

/// Check a peer label
pub fn validate_name(name: &str) -> Result<String, PeerParseError> {
    let name = name.trim();
    if name.chars().count() > MAX_NAME_LEN {
        return Err(PeerParseError::NameTooLong);
    }
    Ok(name.to_string())
}
