use crate::protocol::{PeerAddress, PeerId};
use std::collections::HashMap;

/// Assigns numeric ids to peer addresses.
///
/// Ids are never reused, so a peer that leaves and comes back gets a fresh one.
#[derive(Debug, Default, Clone)]
pub struct PeerRegistry {
    ids: HashMap<PeerAddress, PeerId>,
    addresses: HashMap<PeerId, PeerAddress>,
    next_id: u32,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `address`, assigning one if it is not registered yet.
    pub fn register(&mut self, address: PeerAddress) -> PeerId {
        if let Some(id) = self.ids.get(&address) {
            return *id;
        }
        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.ids.insert(address, id);
        self.addresses.insert(id, address);
        id
    }

    pub fn id_of(&self, address: &PeerAddress) -> Option<PeerId> {
        self.ids.get(address).copied()
    }

    pub fn address_of(&self, id: PeerId) -> Option<PeerAddress> {
        self.addresses.get(&id).copied()
    }

    pub fn unregister(&mut self, address: &PeerAddress) -> Option<PeerId> {
        let id = self.ids.remove(address)?;
        self.addresses.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
