//! Peer Store
//!
//! In-memory peer table ordered by insertion sequence, optionally backed by
//! RocksDB. Writes go to disk first and touch memory only once the disk write
//! succeeded, so a failed write leaves the table unchanged.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{RegistryError, StoreStats};
use crate::types::{Peer, PresharedKey, PublicKey, SeqNo};

/// Key prefixes for different data types
const PREFIX_PEER: &[u8] = b"peer:";

/// Metadata keys
const META_NEXT_SEQ: &[u8] = b"meta:next_seq";

/// On-disk record
///
/// `Peer` never serializes its preshared key, so the record carries it.
#[derive(Serialize, Deserialize)]
struct StoredPeer {
    seq: SeqNo,
    peer: Peer,
    preshared_key: Option<PresharedKey>,
}

/// Authoritative peer table
pub struct PeerStore {
    /// RocksDB instance, absent for a purely in-memory store
    db: Option<DB>,

    /// Primary key index
    by_key: HashMap<PublicKey, SeqNo>,

    /// Records in insertion order
    by_seq: BTreeMap<SeqNo, Peer>,

    /// Next sequence number to hand out
    next_seq: SeqNo,
}

impl PeerStore {
    /// Create an empty store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            db: None,
            by_key: HashMap::new(),
            by_seq: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Open or create a persistent store at the given path
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path)?;

        let mut next_seq = match db.get(META_NEXT_SEQ)? {
            Some(raw) => match <[u8; 8]>::try_from(raw.as_slice()) {
                Ok(bytes) => u64::from_be_bytes(bytes),
                Err(_) => {
                    warn!("Ignoring malformed sequence counter ({} bytes)", raw.len());
                    0
                }
            },
            None => 0,
        };

        let mut by_key = HashMap::new();
        let mut by_seq = BTreeMap::new();

        let iter = db.iterator(IteratorMode::From(PREFIX_PEER, Direction::Forward));
        for item in iter {
            let (key, value) = item?;

            if !key.starts_with(PREFIX_PEER) {
                break;
            }

            let record = match bincode::deserialize::<StoredPeer>(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping undecodable peer record: {}", e);
                    continue;
                }
            };

            if by_seq.contains_key(&record.seq) {
                warn!(
                    "Skipping peer {} with duplicate sequence {}",
                    record.peer.public_key.short(),
                    record.seq
                );
                continue;
            }

            let mut peer = record.peer;
            peer.preshared_key = record.preshared_key;

            next_seq = next_seq.max(record.seq + 1);
            by_key.insert(peer.public_key, record.seq);
            by_seq.insert(record.seq, peer);
        }

        info!("📦 Loaded {} peers from store, next sequence {}", by_seq.len(), next_seq);

        Ok(Self {
            db: Some(db),
            by_key,
            by_seq,
            next_seq,
        })
    }

    /// Look up a peer by key
    pub fn get(&self, key: &PublicKey) -> Result<Peer, RegistryError> {
        self.by_key
            .get(key)
            .and_then(|seq| self.by_seq.get(seq))
            .cloned()
            .ok_or(RegistryError::NotFound(*key))
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Sequence number of a peer
    pub fn seq_of(&self, key: &PublicKey) -> Option<SeqNo> {
        self.by_key.get(key).copied()
    }

    /// Peers in insertion order, borrowed
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.by_seq.values()
    }

    /// Consistent copy of all peers in insertion order
    pub fn snapshot(&self) -> Vec<Peer> {
        self.by_seq.values().cloned().collect()
    }

    /// Copy of all peers with their sequence numbers
    pub fn entries(&self) -> Vec<(SeqNo, Peer)> {
        self.by_seq
            .iter()
            .map(|(seq, peer)| (*seq, peer.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_seq.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    pub fn next_seq(&self) -> SeqNo {
        self.next_seq
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_peers: self.by_seq.len(),
            peers_with_endpoint: self.iter().filter(|p| p.endpoint.is_some()).count(),
            peers_with_handshake: self.iter().filter(|p| p.last_handshake.is_some()).count(),
            allowed_ip_ranges: self.iter().map(|p| p.allowed_ips.len()).sum(),
        }
    }

    /// Insert or replace a peer
    ///
    /// A replaced peer keeps its sequence number; a new one gets the next.
    pub(super) fn put(&mut self, peer: Peer) -> Result<SeqNo, RegistryError> {
        let key = peer.public_key;
        let (seq, is_new) = match self.by_key.get(&key) {
            Some(&seq) => (seq, false),
            None => (self.next_seq, true),
        };

        if let Some(db) = &self.db {
            let record = StoredPeer {
                seq,
                peer: peer.clone(),
                preshared_key: peer.preshared_key,
            };
            let value = bincode::serialize(&record)?;

            let mut batch = WriteBatch::default();
            batch.put(peer_key(&key), value);
            if is_new {
                batch.put(META_NEXT_SEQ, (seq + 1).to_be_bytes());
            }
            db.write(batch)?;
        }

        if is_new {
            self.next_seq = seq + 1;
            self.by_key.insert(key, seq);
        }
        self.by_seq.insert(seq, peer);

        debug!("Stored peer {} at sequence {}", key.short(), seq);
        Ok(seq)
    }

    /// Remove a peer, returning whether it existed
    pub(super) fn delete(&mut self, key: &PublicKey) -> Result<bool, RegistryError> {
        let Some(&seq) = self.by_key.get(key) else {
            return Ok(false);
        };

        if let Some(db) = &self.db {
            db.delete(peer_key(key))?;
        }

        self.by_key.remove(key);
        self.by_seq.remove(&seq);

        debug!("Deleted peer {} (sequence {})", key.short(), seq);
        Ok(true)
    }

    /// Flush all changes to disk
    pub fn flush(&self) -> Result<(), RegistryError> {
        if let Some(db) = &self.db {
            db.flush()?;
        }
        Ok(())
    }
}

/// Create storage key for a peer
fn peer_key(key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_PEER.len() + 32);
    out.extend_from_slice(PREFIX_PEER);
    out.extend_from_slice(key.as_bytes());
    out
}
