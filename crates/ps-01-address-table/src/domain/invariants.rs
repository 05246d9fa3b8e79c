//! # Domain Invariants
//!
//! Rules every address table and snapshot must satisfy.

use super::address_table::AddressTable;
use super::snapshot::Snapshot;
use shared_types::{AddressError, SnapshotError};

/// Invariant: every element's object is registered at an index less than or
/// equal to the element's own index.
pub fn invariant_object_precedes_element(table: &AddressTable) -> Result<(), AddressError> {
    for (index, reference) in table.iter() {
        let object = reference.object_address()?;
        match table.index_of(&object) {
            Some(object_index) if object_index <= index => {}
            Some(object_index) => {
                return Err(AddressError::Malformed(format!(
                    "object of index {index} registered later at {object_index}"
                )))
            }
            None => {
                return Err(AddressError::Malformed(format!(
                    "object of index {index} not registered"
                )))
            }
        }
    }
    Ok(())
}

/// Invariant: index <-> reference is a bijection over the table.
pub fn invariant_injective(table: &AddressTable) -> bool {
    table
        .iter()
        .all(|(index, reference)| table.index_of(reference) == Some(index))
}

/// Invariant: the snapshot is closed over its table.
pub fn invariant_closed_world(snapshot: &Snapshot) -> Result<(), SnapshotError> {
    snapshot.validate()?;
    if !invariant_injective(snapshot.table()) {
        return Err(SnapshotError::Corrupt("table is not injective".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Reference, TypeId, TypeInstance, MPO};

    fn member(sub: u8) -> Reference {
        Reference::network(
            TypeInstance::new(TypeId::make_context(6, sub), 0),
            MPO::new(0, 0, 1),
            2,
        )
    }

    #[test]
    fn test_registered_tables_hold_invariants() {
        let mut table = AddressTable::new();
        for sub in [3, 1, 0, 7] {
            table.ref_to_index(&member(sub)).unwrap();
        }
        assert!(invariant_object_precedes_element(&table).is_ok());
        assert!(invariant_injective(&table));
    }

    #[test]
    fn test_out_of_order_table_detected() {
        let table = AddressTable::from_references(vec![member(3), member(0)]).unwrap();
        assert!(invariant_object_precedes_element(&table).is_err());

        let orphan = AddressTable::from_references(vec![member(3)]).unwrap();
        assert!(invariant_object_precedes_element(&orphan).is_err());
    }
}
