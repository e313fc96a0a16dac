//! Registry of connected peers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::traits::{Peer, PeerId};

/// Connected peers keyed by connection id.
///
/// Links register on establishment and unregister on loss; probe delivery
/// loops look up the peer that started their session.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, Arc<dyn Peer>>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, Arc<dyn Peer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a newly connected peer, replacing any peer with the same id.
    pub fn register(&self, id: PeerId, peer: Arc<dyn Peer>) {
        let connected = {
            let mut peers = self.peers();
            peers.insert(id, peer);
            peers.len()
        };
        tracing::info!(peer = %id, "{connected} clients connected");
    }

    /// Forget a peer. Returns it if it was registered.
    pub fn unregister(&self, id: PeerId) -> Option<Arc<dyn Peer>> {
        let (removed, connected) = {
            let mut peers = self.peers();
            let removed = peers.remove(&id);
            (removed, peers.len())
        };
        if removed.is_some() {
            tracing::info!(peer = %id, "{connected} clients connected");
        }
        removed
    }

    /// Find the peer with the given id.
    #[must_use]
    pub fn lookup(&self, id: PeerId) -> Option<Arc<dyn Peer>> {
        self.peers().get(&id).cloned()
    }

    /// Visit every registered peer.
    ///
    /// The visitor runs on a snapshot, so it may call back into the registry.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(PeerId, &Arc<dyn Peer>),
    {
        let snapshot: Vec<(PeerId, Arc<dyn Peer>)> = self
            .peers()
            .iter()
            .map(|(id, peer)| (*id, Arc::clone(peer)))
            .collect();

        for (id, peer) in &snapshot {
            visitor(*id, peer);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }
}
