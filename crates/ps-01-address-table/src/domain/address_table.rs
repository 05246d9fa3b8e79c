//! # Address Table
//!
//! Injective, append-only mapping between dense indices and references.
//!
//! Registering an element first registers its owning object, so object
//! boundaries can be recovered from index order alone: the object of any
//! element sits at an index less than or equal to the element's.

use shared_types::{AddressError, Reference};
use std::collections::HashMap;
use tracing::trace;

/// Dense position of a reference in an [`AddressTable`].
pub type Index = u32;

/// Index <-> reference registry for one serialize/persist operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable {
    /// References by index.
    references: Vec<Reference>,
    /// Reverse map.
    indices: HashMap<Reference, Index>,
}

impl AddressTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound indices.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// References ordered by index.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// `(index, reference)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &Reference)> {
        self.references
            .iter()
            .enumerate()
            .map(|(i, r)| (i as Index, r))
    }

    /// Existing index of `reference`, without registering it.
    pub fn index_of(&self, reference: &Reference) -> Option<Index> {
        self.indices.get(reference).copied()
    }

    /// Index of `reference`, registering it (and its object first) if new.
    pub fn ref_to_index(&mut self, reference: &Reference) -> Result<Index, AddressError> {
        if let Some(index) = self.index_of(reference) {
            return Ok(index);
        }
        let object = reference.object_address()?;
        if object != *reference && !self.indices.contains_key(&object) {
            self.push(object);
        }
        Ok(self.push(*reference))
    }

    /// Reference bound to `index`.
    pub fn index_to_ref(&self, index: Index) -> Result<Reference, AddressError> {
        self.references
            .get(index as usize)
            .copied()
            .ok_or(AddressError::IndexOutOfRange {
                index: index as usize,
                len: self.references.len(),
            })
    }

    /// Rebind `index` to `new_ref`, returning the previous reference.
    ///
    /// Every other binding is left untouched. Fails if `index` is unbound or
    /// `new_ref` is already bound elsewhere.
    pub fn remap(&mut self, index: Index, new_ref: Reference) -> Result<Reference, AddressError> {
        let old = self.index_to_ref(index)?;
        if old == new_ref {
            return Ok(old);
        }
        if !new_ref.is_valid() {
            return Err(AddressError::InvalidReference);
        }
        if let Some(existing) = self.index_of(&new_ref) {
            return Err(AddressError::AlreadyBound {
                index: existing as usize,
            });
        }
        self.indices.remove(&old);
        self.indices.insert(new_ref, index);
        self.references[index as usize] = new_ref;
        trace!(index, from = %old, to = %new_ref, "[ps-01] remapped");
        Ok(old)
    }

    /// Rebuild a table from references in index order.
    ///
    /// Fails with the first duplicate's index.
    pub fn from_references(references: Vec<Reference>) -> Result<Self, AddressError> {
        let mut indices = HashMap::with_capacity(references.len());
        for (i, reference) in references.iter().enumerate() {
            if let Some(previous) = indices.insert(*reference, i as Index) {
                return Err(AddressError::AlreadyBound {
                    index: previous as usize,
                });
            }
        }
        Ok(Self {
            references,
            indices,
        })
    }

    fn push(&mut self, reference: Reference) -> Index {
        let index = self.references.len() as Index;
        self.references.push(reference);
        self.indices.insert(reference, index);
        index
    }
}
