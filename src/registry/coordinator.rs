//! Mutation Coordinator
//!
//! The only writer of the peer store. Every mutation runs under the store's
//! write lock and completes without suspending once the lock is held, so a
//! caller dropping the future can never leave a half-applied change behind.

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{RegistryError, SharedStore};
use crate::types::{NewPeer, Peer, PeerUpdate, PublicKey, Timestamp};

/// Change notification published after each successful mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added(PublicKey),
    Updated(PublicKey),
    Removed(PublicKey),
    Handshake(PublicKey),
}

pub struct MutationCoordinator {
    store: SharedStore,
    events: broadcast::Sender<PeerEvent>,
}

impl MutationCoordinator {
    pub fn new(store: SharedStore, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self { store, events }
    }

    /// Receive change notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Register a new peer
    pub async fn add_peer(&self, new_peer: NewPeer) -> Result<Peer, RegistryError> {
        let key = new_peer.public_key;
        let mut store = self.store.write().await;

        if store.contains(&key) {
            return Err(RegistryError::AlreadyExists(key));
        }

        let peer = new_peer.into_peer(Utc::now());
        let seq = store.put(peer.clone())?;

        debug!("➕ Added peer {} (sequence {})", key.short(), seq);
        self.publish(PeerEvent::Added(key));
        Ok(peer)
    }

    /// Remove a peer
    pub async fn remove_peer(&self, key: &PublicKey) -> Result<(), RegistryError> {
        let mut store = self.store.write().await;

        if !store.delete(key)? {
            return Err(RegistryError::NotFound(*key));
        }

        debug!("➖ Removed peer {}", key.short());
        self.publish(PeerEvent::Removed(*key));
        Ok(())
    }

    /// Apply a partial update
    pub async fn update_peer(
        &self,
        key: &PublicKey,
        update: PeerUpdate,
    ) -> Result<Peer, RegistryError> {
        let mut store = self.store.write().await;
        // An absent key wins over an empty update
        let mut peer = store.get(key)?;

        if update.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "update must supply at least one field".to_string(),
            ));
        }

        update.apply_to(&mut peer);
        store.put(peer.clone())?;

        debug!("✏️  Updated peer {}", key.short());
        self.publish(PeerEvent::Updated(*key));
        Ok(peer)
    }

    /// Record a completed handshake, reported by the handshake monitor
    ///
    /// Older reports than the stored one are ignored.
    pub async fn record_handshake(
        &self,
        key: &PublicKey,
        at: Timestamp,
    ) -> Result<Peer, RegistryError> {
        let mut store = self.store.write().await;
        let mut peer = store.get(key)?;

        if peer.last_handshake.map_or(true, |previous| at > previous) {
            peer.last_handshake = Some(at);
            store.put(peer.clone())?;
            self.publish(PeerEvent::Handshake(*key));
        }

        Ok(peer)
    }

    /// Sent while the write lock is still held so events keep mutation order
    fn publish(&self, event: PeerEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}
