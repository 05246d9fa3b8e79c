//! Heap Registry Adapter
//!
//! Process-local reverse table from heap pointers to network addresses.
//! Implements the `HeapResolver` seam used by `Reference::network_address`
//! and `Snapshot::to_network`.

use parking_lot::RwLock;
use shared_types::{HeapPtr, HeapResolver, NetworkAddress, OwnerId};
use std::collections::HashMap;
use tracing::debug;

/// Heap pointer -> network object table for one process.
#[derive(Default)]
pub struct HeapRegistry {
    entries: RwLock<HashMap<(OwnerId, HeapPtr), NetworkAddress>>,
}

impl HeapRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner`'s object at `heap` is `address`.
    pub fn register(&self, owner: OwnerId, heap: HeapPtr, address: NetworkAddress) {
        debug!(owner, heap = %heap, address = ?address, "[ps-01] heap object registered");
        self.entries.write().insert((owner, heap), address);
    }

    /// Forget a pointer.
    pub fn unregister(&self, owner: OwnerId, heap: HeapPtr) -> Option<NetworkAddress> {
        self.entries.write().remove(&(owner, heap))
    }

    /// Forget every pointer of `owner`.
    pub fn clear_owner(&self, owner: OwnerId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(o, _), _| *o != owner);
        before - entries.len()
    }

    /// Registered pointers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl HeapResolver for HeapRegistry {
    fn resolve(&self, owner: OwnerId, heap: HeapPtr) -> Option<NetworkAddress> {
        self.entries.read().get(&(owner, heap)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Reference, TypeId, TypeInstance, MPO};

    #[test]
    fn test_register_resolve_unregister() {
        let registry = HeapRegistry::new();
        let net = NetworkAddress::make_root(MPO::new(0, 1, 4));
        registry.register(4, HeapPtr(0x100), net);
        assert_eq!(registry.resolve(4, HeapPtr(0x100)), Some(net));
        assert_eq!(registry.resolve(5, HeapPtr(0x100)), None);

        let member = Reference::heap(
            TypeInstance::new(TypeId::make_context(1, 3), 2),
            4,
            HeapPtr(0x100),
        );
        let translated = member.network_address(&registry).unwrap();
        assert_eq!(translated.mpo, net.mpo);
        assert_eq!(translated.type_instance.instance, 2);

        assert_eq!(registry.unregister(4, HeapPtr(0x100)), Some(net));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_owner() {
        let registry = HeapRegistry::new();
        let net = NetworkAddress::make_root(MPO::new(0, 0, 1));
        registry.register(1, HeapPtr(1), net);
        registry.register(1, HeapPtr(2), net);
        registry.register(2, HeapPtr(3), net);
        assert_eq!(registry.clear_owner(1), 2);
        assert_eq!(registry.len(), 1);
    }
}
