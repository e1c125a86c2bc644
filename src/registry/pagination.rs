//! Pagination Engine
//!
//! Offset/limit windows over a consistent view of the store. The default
//! order is insertion order, so peers added after a page was served never
//! shift the items of earlier pages.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

use super::{RegistryError, SharedStore};
use crate::types::{Peer, PublicKey};

/// Sort order for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerOrder {
    /// Order in which peers were added
    #[default]
    Insertion,
    NameAsc,
    NameDesc,
    LastHandshakeAsc,
    LastHandshakeDesc,
}

impl PeerOrder {
    /// Total order over peers; ties on the sort field fall back to the key
    fn compare(&self, a: &Peer, b: &Peer) -> Ordering {
        match self {
            PeerOrder::Insertion => Ordering::Equal,
            PeerOrder::NameAsc => (&a.name, &a.public_key).cmp(&(&b.name, &b.public_key)),
            PeerOrder::NameDesc => PeerOrder::NameAsc.compare(b, a),
            PeerOrder::LastHandshakeAsc => {
                (a.last_handshake, a.public_key).cmp(&(b.last_handshake, b.public_key))
            }
            PeerOrder::LastHandshakeDesc => PeerOrder::LastHandshakeAsc.compare(b, a),
        }
    }
}

impl FromStr for PeerOrder {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "insertion" => Ok(PeerOrder::Insertion),
            "name_asc" => Ok(PeerOrder::NameAsc),
            "name_desc" => Ok(PeerOrder::NameDesc),
            "last_handshake_asc" => Ok(PeerOrder::LastHandshakeAsc),
            "last_handshake_desc" => Ok(PeerOrder::LastHandshakeDesc),
            other => Err(RegistryError::InvalidArgument(format!(
                "unknown order {:?}",
                other
            ))),
        }
    }
}

/// One window of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Peer>,
    pub total_count: u64,
}

/// Read side of the registry
pub struct Paginator {
    store: SharedStore,
    max_page_size: u64,
}

impl Paginator {
    pub fn new(store: SharedStore, max_page_size: u64) -> Self {
        Self {
            store,
            max_page_size: max_page_size.max(1),
        }
    }

    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    /// List peers in insertion order
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Page, RegistryError> {
        self.list_ordered(offset, limit, PeerOrder::Insertion).await
    }

    /// List peers in the given order
    ///
    /// A negative offset or a non-positive limit is rejected; a limit above
    /// the maximum page size is clamped.
    pub async fn list_ordered(
        &self,
        offset: i64,
        limit: i64,
        order: PeerOrder,
    ) -> Result<Page, RegistryError> {
        self.list_matching(offset, limit, order, None).await
    }

    /// List only the peers whose key is in `keys`
    ///
    /// The filter applies before windowing, so `total_count` counts matches.
    /// `None` lists every peer; an empty set matches nothing.
    pub async fn list_matching(
        &self,
        offset: i64,
        limit: i64,
        order: PeerOrder,
        keys: Option<&HashSet<PublicKey>>,
    ) -> Result<Page, RegistryError> {
        let (offset, limit) = self.window(offset, limit)?;

        let store = self.store.read().await;
        let page = match keys {
            Some(keys) => paginate(
                store.iter().filter(|p| keys.contains(&p.public_key)),
                offset,
                limit,
                order,
            ),
            None => paginate(store.iter(), offset, limit, order),
        };
        Ok(page)
    }

    /// Fetch a single peer
    pub async fn get(&self, key: &PublicKey) -> Result<Peer, RegistryError> {
        self.store.read().await.get(key)
    }

    fn window(&self, offset: i64, limit: i64) -> Result<(usize, usize), RegistryError> {
        if offset < 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "offset must not be negative, got {}",
                offset
            )));
        }
        if limit <= 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "limit must be positive, got {}",
                limit
            )));
        }

        let limit = (limit as u64).min(self.max_page_size);
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok((offset, limit))
    }
}

/// Cut one window out of peers given in insertion order
pub fn paginate<'a, I>(peers: I, offset: usize, limit: usize, order: PeerOrder) -> Page
where
    I: Iterator<Item = &'a Peer>,
{
    let mut peers: Vec<&Peer> = peers.collect();
    let total_count = peers.len() as u64;

    if order != PeerOrder::Insertion {
        peers.sort_by(|a, b| order.compare(a, b));
    }

    let items = peers
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect();

    Page { items, total_count }
}
