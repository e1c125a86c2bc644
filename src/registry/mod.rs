//! Peer Registry Module
//!
//! Authoritative peer table plus the two components allowed to touch it:
//! the pagination engine (reads) and the mutation coordinator (writes).
//! Both share one `RwLock`, so reads run in parallel and every write is
//! serialized against reads and other writes.

mod store;
pub mod coordinator;
pub mod pagination;

pub use coordinator::{MutationCoordinator, PeerEvent};
pub use pagination::{Page, Paginator, PeerOrder};
pub use store::PeerStore;

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{PeerParseError, PublicKey};

/// Store handle injected into every component at startup
pub type SharedStore = Arc<RwLock<PeerStore>>;

/// Wrap a store into a shareable handle
pub fn shared(store: PeerStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}

/// Registry failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("peer {0} not found")]
    NotFound(PublicKey),

    #[error("peer {0} already exists")]
    AlreadyExists(PublicKey),

    #[error("storage failure: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("record encoding failure: {0}")]
    Encoding(#[from] bincode::Error),
}

impl From<PeerParseError> for RegistryError {
    fn from(err: PeerParseError) -> Self {
        RegistryError::InvalidArgument(err.to_string())
    }
}

/// Coarse classification used by the RPC layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Internal,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RegistryError::Storage(_) | RegistryError::Encoding(_) => ErrorKind::Internal,
        }
    }
}

/// Point-in-time figures about the store
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Total peers in the store
    pub total_peers: usize,

    /// Peers with a known endpoint
    pub peers_with_endpoint: usize,

    /// Peers that completed at least one handshake
    pub peers_with_handshake: usize,

    /// Sum of allowed IP ranges across all peers
    pub allowed_ip_ranges: usize,
}
