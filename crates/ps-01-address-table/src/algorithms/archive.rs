//! # Snapshot Archive
//!
//! Writes values into a snapshot's buffer and reads them back. Plain values
//! go through bincode; references are written as table indices and resolved
//! through the embedded table on read.

use crate::domain::{Index, Snapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Reference, SnapshotError, SpaceError};

fn corrupt(error: bincode::Error) -> SnapshotError {
    SnapshotError::Corrupt(error.to_string())
}

/// Save side of the archive.
pub struct SnapshotWriter<'a> {
    snapshot: &'a mut Snapshot,
}

impl<'a> SnapshotWriter<'a> {
    /// Append to `snapshot`'s buffer.
    pub fn new(snapshot: &'a mut Snapshot) -> Self {
        Self { snapshot }
    }

    /// Start an object: registers it and records it as a root.
    pub fn begin_object(&mut self, object: &Reference) -> Result<Index, SpaceError> {
        Ok(self.snapshot.begin_object(object)?)
    }

    /// Write a plain value.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SpaceError> {
        bincode::serialize_into(self.snapshot.buffer_mut(), value).map_err(corrupt)?;
        Ok(())
    }

    /// Write a reference as its table index.
    pub fn write_reference(&mut self, reference: &Reference) -> Result<Index, SpaceError> {
        let index = self.snapshot.ref_to_index(reference)?;
        self.write(&index)?;
        Ok(index)
    }
}

/// Load side of the archive.
pub struct SnapshotReader<'a> {
    snapshot: &'a Snapshot,
    cursor: usize,
}

impl<'a> SnapshotReader<'a> {
    /// Read from the start of `snapshot`'s buffer.
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            cursor: 0,
        }
    }

    /// Read a plain value.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, SnapshotError> {
        let mut rest = &self.snapshot.buffer()[self.cursor..];
        let before = rest.len();
        let value = bincode::deserialize_from(&mut rest).map_err(corrupt)?;
        self.cursor += before - rest.len();
        Ok(value)
    }

    /// Read a reference written by [`SnapshotWriter::write_reference`].
    pub fn read_reference(&mut self) -> Result<Reference, SnapshotError> {
        let index: Index = self.read()?;
        self.snapshot
            .index_to_ref(index)
            .map_err(|_| SnapshotError::UnresolvedIndex {
                index,
                len: self.snapshot.table().len(),
            })
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.snapshot.buffer().len() - self.cursor
    }

    /// True when the whole buffer has been read.
    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }
}
