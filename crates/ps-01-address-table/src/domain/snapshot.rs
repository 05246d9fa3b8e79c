//! # Snapshot
//!
//! A captured heap image: timestamp, address table, root indices and the raw
//! buffer. Every reference written into the buffer is an index into the
//! embedded table, which is what lets cyclic graphs serialize and lets the
//! image be rehydrated wherever its objects are later placed.

use super::address_table::{AddressTable, Index};
use shared_types::{AddressError, HeapResolver, Reference, SnapshotError, TimeStamp};
use tracing::debug;

/// Serialized object graph with its own address table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    timestamp: TimeStamp,
    table: AddressTable,
    roots: Vec<Index>,
    buffer: Vec<u8>,
}

impl Snapshot {
    /// Empty snapshot taken at `timestamp`.
    pub fn new(timestamp: TimeStamp) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Reassemble a snapshot from decoded parts.
    pub fn from_parts(
        timestamp: TimeStamp,
        table: AddressTable,
        roots: Vec<Index>,
        buffer: Vec<u8>,
    ) -> Self {
        Self {
            timestamp,
            table,
            roots,
            buffer,
        }
    }

    /// Logical time of capture.
    pub fn timestamp(&self) -> TimeStamp {
        self.timestamp
    }

    /// Set the logical time of capture.
    pub fn set_timestamp(&mut self, timestamp: TimeStamp) {
        self.timestamp = timestamp;
    }

    /// Embedded table.
    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    /// Embedded table, mutable for relocation.
    pub fn table_mut(&mut self) -> &mut AddressTable {
        &mut self.table
    }

    /// Objects begun, in order.
    pub fn roots(&self) -> &[Index] {
        &self.roots
    }

    /// Captured bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Replace the captured bytes.
    pub fn set_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer;
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Register `object` and append it to the roots.
    pub fn begin_object(&mut self, object: &Reference) -> Result<Index, AddressError> {
        let index = self.table.ref_to_index(object)?;
        self.roots.push(index);
        Ok(index)
    }

    /// See [`AddressTable::ref_to_index`].
    pub fn ref_to_index(&mut self, reference: &Reference) -> Result<Index, AddressError> {
        self.table.ref_to_index(reference)
    }

    /// See [`AddressTable::index_to_ref`].
    pub fn index_to_ref(&self, index: Index) -> Result<Reference, AddressError> {
        self.table.index_to_ref(index)
    }

    /// Rebind every heap reference to its network address.
    ///
    /// The translated table is built aside and swapped in whole, so a
    /// failure leaves the table as it was. Returns the number remapped.
    pub fn to_network(&mut self, resolver: &dyn HeapResolver) -> Result<usize, AddressError> {
        let mut remapped = 0usize;
        let references = self
            .table
            .iter()
            .map(|(_, reference)| {
                if !reference.is_heap_address() {
                    return Ok(*reference);
                }
                remapped += 1;
                Ok(Reference::Network(reference.network_address(resolver)?))
            })
            .collect::<Result<Vec<_>, AddressError>>()?;
        self.table = AddressTable::from_references(references)?;
        debug!(remapped, "[ps-01] snapshot translated to network addresses");
        Ok(remapped)
    }

    /// Every root must resolve through the table.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let len = self.table.len();
        match self.roots.iter().find(|&&root| root as usize >= len) {
            Some(&index) => Err(SnapshotError::UnresolvedIndex { index, len }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{HeapPtr, NetworkAddress, OwnerId, TypeId, TypeInstance, MPO};
    use std::collections::HashMap;

    struct Heap(HashMap<(OwnerId, HeapPtr), NetworkAddress>);

    impl HeapResolver for Heap {
        fn resolve(&self, owner: OwnerId, heap: HeapPtr) -> Option<NetworkAddress> {
            self.0.get(&(owner, heap)).copied()
        }
    }

    fn object_type() -> TypeInstance {
        TypeInstance::new(TypeId::make_context(4, 0), 0)
    }

    #[test]
    fn test_begin_object_registers_and_roots() {
        let mut snapshot = Snapshot::new(12);
        let r = Reference::network(object_type(), MPO::new(0, 0, 1), 3);
        let index = snapshot.begin_object(&r).unwrap();
        assert_eq!(snapshot.roots(), &[index]);
        assert_eq!(snapshot.index_to_ref(index).unwrap(), r);
        assert_eq!(snapshot.timestamp(), 12);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_to_network_translates_heap_bindings() {
        let net = NetworkAddress::new(MPO::new(0, 0, 1), 5, object_type());
        let heap = Heap(HashMap::from([((1, HeapPtr(0x10)), net)]));

        let mut snapshot = Snapshot::new(1);
        let local = Reference::heap(object_type(), 1, HeapPtr(0x10));
        let index = snapshot.begin_object(&local).unwrap();

        assert_eq!(snapshot.to_network(&heap).unwrap(), 1);
        assert_eq!(snapshot.index_to_ref(index).unwrap(), Reference::Network(net));
    }

    #[test]
    fn test_to_network_is_all_or_nothing() {
        let net = NetworkAddress::new(MPO::new(0, 0, 1), 5, object_type());
        let heap = Heap(HashMap::from([((1, HeapPtr(0x10)), net)]));

        let mut snapshot = Snapshot::new(1);
        let known = Reference::heap(object_type(), 1, HeapPtr(0x10));
        let foreign = Reference::heap(object_type(), 1, HeapPtr(0x99));
        snapshot.begin_object(&known).unwrap();
        snapshot.begin_object(&foreign).unwrap();

        assert!(matches!(
            snapshot.to_network(&heap),
            Err(AddressError::ForeignHeap { .. })
        ));
        assert_eq!(snapshot.index_to_ref(0).unwrap(), known);
    }

    #[test]
    fn test_to_network_collision_leaves_table() {
        let net = NetworkAddress::new(MPO::new(0, 0, 1), 5, object_type());
        let heap = Heap(HashMap::from([
            ((1, HeapPtr(0x10)), net),
            ((1, HeapPtr(0x20)), net),
        ]));

        let mut snapshot = Snapshot::new(1);
        let first = Reference::heap(object_type(), 1, HeapPtr(0x10));
        let second = Reference::heap(object_type(), 1, HeapPtr(0x20));
        snapshot.begin_object(&first).unwrap();
        snapshot.begin_object(&second).unwrap();
        let before = snapshot.table().clone();

        assert!(matches!(
            snapshot.to_network(&heap),
            Err(AddressError::AlreadyBound { index: 0 })
        ));
        assert_eq!(snapshot.table(), &before);
        assert_eq!(snapshot.index_to_ref(0).unwrap(), first);
        assert_eq!(snapshot.index_to_ref(1).unwrap(), second);
    }

    #[test]
    fn test_validate_catches_dangling_root() {
        let snapshot = Snapshot::from_parts(0, AddressTable::new(), vec![0], Vec::new());
        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::UnresolvedIndex { index: 0, len: 0 })
        ));
    }
}
