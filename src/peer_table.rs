use crate::negotiator::PeerNegotiator;
use crate::peer_id::PeerId;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Table of peer negotiations, holding at most one [PeerNegotiator] per remote peer.
#[derive(Default)]
pub(crate) struct PeerTable {
    entries: Mutex<HashMap<PeerId, PeerNegotiator>>,
}

impl PeerTable {
    /// Inserts a negotiator created by `create` unless `peer` already has one. Lookup and insert
    /// happen under the same lock. Returns `true` if a new negotiator has been inserted.
    pub fn insert_with<F>(&self, peer: PeerId, create: F) -> bool
    where
        F: FnOnce(&PeerId) -> PeerNegotiator,
    {
        let mut entries = self.entries.lock();
        match entries.entry(peer) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                let negotiator = create(e.key());
                e.insert(negotiator);
                true
            }
        }
    }

    pub fn with<F, R>(&self, peer: &PeerId, f: F) -> Option<R>
    where
        F: FnOnce(&PeerNegotiator) -> R,
    {
        let entries = self.entries.lock();
        entries.get(peer).map(f)
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PeerNegotiator> {
        self.entries.lock().remove(peer)
    }

    /// Removes the entry for `peer` only if it still belongs to the negotiation `generation`.
    pub fn remove_generation(&self, peer: &PeerId, generation: u64) -> Option<PeerNegotiator> {
        let mut entries = self.entries.lock();
        match entries.get(peer) {
            Some(n) if n.generation() == generation => entries.remove(peer),
            _ => None,
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
