//! WireGuardService facade
//!
//! Validates decoded requests, hands reads to the paginator and writes to the
//! mutation coordinator, and maps registry errors onto protocol codes.
//! Nothing here knows about HTTP.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

use crate::api::types::*;
use crate::config::RegistryConfig;
use crate::registry::{
    ErrorKind, MutationCoordinator, Paginator, PeerOrder, RegistryError, SharedStore,
};
use crate::types::{
    parse_allowed_ips, validate_name, Endpoint, NewPeer, PeerUpdate, PresharedKey, PublicKey,
};

/// The RPC contract, one method per operation
#[async_trait]
pub trait WireGuardService: Send + Sync {
    async fn list_peers(&self, req: ListPeersRequest) -> Result<ListPeersResponse, RpcError>;

    async fn add_peer(&self, req: AddPeerRequest) -> Result<AddPeerResponse, RpcError>;

    async fn remove_peer(&self, req: RemovePeerRequest) -> Result<RemovePeerResponse, RpcError>;

    async fn update_peer(&self, req: UpdatePeerRequest) -> Result<UpdatePeerResponse, RpcError>;

    async fn get_peer(&self, req: GetPeerRequest) -> Result<GetPeerResponse, RpcError>;
}

/// Registry-backed implementation
pub struct PeerService {
    paginator: Paginator,
    coordinator: Arc<MutationCoordinator>,
    default_page_size: i64,
}

impl PeerService {
    pub fn new(
        store: SharedStore,
        coordinator: Arc<MutationCoordinator>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            paginator: Paginator::new(store, config.max_page_size),
            coordinator,
            default_page_size: i64::try_from(config.default_page_size).unwrap_or(i64::MAX),
        }
    }
}

#[async_trait]
impl WireGuardService for PeerService {
    async fn list_peers(&self, req: ListPeersRequest) -> Result<ListPeersResponse, RpcError> {
        let offset = match &req.offset {
            Some(offset) => offset.to_i64("offset")?,
            None => 0,
        };
        let limit = match &req.limit {
            Some(limit) => limit.to_i64("limit")?,
            None => self.default_page_size,
        };
        let order: PeerOrder = req
            .order
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e| map_error("ListPeers", e))?;
        let keys = req.public_keys.as_deref().map(parse_key_filter).transpose()?;

        let page = self
            .paginator
            .list_matching(offset, limit, order, keys.as_ref())
            .await
            .map_err(|e| map_error("ListPeers", e))?;

        Ok(ListPeersResponse {
            peers: page.items,
            total_count: page.total_count,
        })
    }

    async fn add_peer(&self, req: AddPeerRequest) -> Result<AddPeerResponse, RpcError> {
        let input = req
            .peer
            .ok_or_else(|| RpcError::invalid_argument("peer is required"))?;
        let new_peer = new_peer_from_input(input)?;

        let peer = self
            .coordinator
            .add_peer(new_peer)
            .await
            .map_err(|e| map_error("AddPeer", e))?;

        Ok(AddPeerResponse { peer })
    }

    async fn remove_peer(&self, req: RemovePeerRequest) -> Result<RemovePeerResponse, RpcError> {
        let key = parse_key(req.public_key.as_deref())?;

        self.coordinator
            .remove_peer(&key)
            .await
            .map_err(|e| map_error("RemovePeer", e))?;

        Ok(RemovePeerResponse {})
    }

    async fn update_peer(&self, req: UpdatePeerRequest) -> Result<UpdatePeerResponse, RpcError> {
        let key = parse_key(req.public_key.as_deref())?;
        // Missing fields reach the coordinator as an empty update
        let update = update_from_input(req.fields.unwrap_or_default())?;

        let peer = self
            .coordinator
            .update_peer(&key, update)
            .await
            .map_err(|e| map_error("UpdatePeer", e))?;

        Ok(UpdatePeerResponse { peer })
    }

    async fn get_peer(&self, req: GetPeerRequest) -> Result<GetPeerResponse, RpcError> {
        let key = parse_key(req.public_key.as_deref())?;

        let peer = self
            .paginator
            .get(&key)
            .await
            .map_err(|e| map_error("GetPeer", e))?;

        Ok(GetPeerResponse { peer })
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn parse_key(value: Option<&str>) -> Result<PublicKey, RpcError> {
    match value.map(str::trim) {
        None | Some("") => Err(RpcError::invalid_argument("publicKey is required")),
        Some(text) => text
            .parse()
            .map_err(|e| RpcError::invalid_argument(format!("publicKey: {}", e))),
    }
}

fn parse_key_filter(values: &[String]) -> Result<HashSet<PublicKey>, RpcError> {
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| RpcError::invalid_argument(format!("publicKeys: {}", e)))
        })
        .collect()
}

fn parse_preshared_key(value: &str) -> Result<PresharedKey, RpcError> {
    value
        .trim()
        .parse()
        .map_err(|e| RpcError::invalid_argument(format!("presharedKey: {}", e)))
}

fn parse_endpoint(value: &str) -> Result<Endpoint, RpcError> {
    value
        .trim()
        .parse()
        .map_err(|e| RpcError::invalid_argument(format!("endpoint: {}", e)))
}

fn parse_keepalive(value: &WireInt) -> Result<u16, RpcError> {
    let secs = value.to_i64("persistentKeepalive")?;
    u16::try_from(secs).map_err(|_| {
        RpcError::invalid_argument(format!(
            "persistentKeepalive must be between 0 and {}, got {}",
            u16::MAX,
            secs
        ))
    })
}

fn parse_ips(values: &[String]) -> Result<Vec<ipnetwork::IpNetwork>, RpcError> {
    parse_allowed_ips(values).map_err(|e| RpcError::invalid_argument(format!("allowedIPs: {}", e)))
}

fn parse_name(value: &str) -> Result<String, RpcError> {
    validate_name(value).map_err(|e| RpcError::invalid_argument(format!("name: {}", e)))
}

/// Every field is checked before anything reaches the coordinator
fn new_peer_from_input(input: PeerInput) -> Result<NewPeer, RpcError> {
    let mut peer = NewPeer::new(parse_key(input.public_key.as_deref())?);

    if let Some(ips) = &input.allowed_ips {
        peer.allowed_ips = parse_ips(ips)?;
    }
    if let Some(endpoint) = input.endpoint.as_deref() {
        peer.endpoint = Some(parse_endpoint(endpoint)?);
    }
    if let Some(name) = input.name.as_deref() {
        peer.name = parse_name(name)?;
    }
    if let Some(keepalive) = &input.persistent_keepalive {
        peer.persistent_keepalive = parse_keepalive(keepalive)?;
    }
    if let Some(psk) = input.preshared_key.as_deref() {
        peer.preshared_key = Some(parse_preshared_key(psk)?);
    }

    Ok(peer)
}

fn update_from_input(input: PartialPeerInput) -> Result<PeerUpdate, RpcError> {
    Ok(PeerUpdate {
        allowed_ips: input.allowed_ips.as_deref().map(parse_ips).transpose()?,
        endpoint: match input.endpoint {
            None => None,
            Some(None) => Some(None),
            Some(Some(endpoint)) => Some(Some(parse_endpoint(&endpoint)?)),
        },
        name: input.name.as_deref().map(parse_name).transpose()?,
        persistent_keepalive: input
            .persistent_keepalive
            .as_ref()
            .map(parse_keepalive)
            .transpose()?,
        preshared_key: match input.preshared_key {
            None => None,
            Some(None) => Some(None),
            Some(Some(psk)) => Some(Some(parse_preshared_key(&psk)?)),
        },
    })
}

/// Translate a registry error; internal details only reach the log
fn map_error(operation: &str, err: RegistryError) -> RpcError {
    match err.kind() {
        ErrorKind::InvalidArgument => RpcError::invalid_argument(err.to_string()),
        ErrorKind::NotFound => RpcError::not_found(err.to_string()),
        ErrorKind::AlreadyExists => RpcError::already_exists(err.to_string()),
        ErrorKind::Internal => {
            error!("{} failed: {}", operation, err);
            RpcError::internal()
        }
    }
}
