//! # PS-01 Address Table
//!
//! Index/reference registries used to serialize object graphs, the snapshot
//! persistence format, and fixed-capacity slot allocators.
//!
//! **Subsystem ID:** 01
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! - `AddressTable`: injective, append-only `Index <-> Reference` mapping
//!   that registers an element's object before the element
//! - `Snapshot`: timestamp + table + roots + raw buffer; cross-references in
//!   the buffer are indices, so cyclic graphs serialize naturally
//! - Graph walk with an explicit worklist and visited set, and a staged load
//!   that never leaves live state half-written
//! - Persistence codec with magic, version and checksum
//! - Slot allocators for process, owner and allocation ids
//!
//! ## Module Structure
//!
//! ```text
//! ps-01-address-table/
//! ├── domain/          # AddressTable, Snapshot, allocators, invariants
//! ├── algorithms/      # Archive reader/writer, graph walk, codec
//! ├── ports/           # SnapshotStore
//! └── adapters/        # HeapRegistry, file and in-memory stores
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{FileSnapshotStore, HeapRegistry, InMemorySnapshotStore};
pub use algorithms::{
    decode_snapshot, encode_snapshot, load_graph, save_graph, GraphWalk, ObjectImage, ObjectSink,
    ObjectSource, SnapshotHeader, SnapshotReader, SnapshotWriter, StagedGraph, StagedObject,
    SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use domain::{
    invariant_closed_world, invariant_injective, invariant_object_precedes_element, AddressTable,
    BitmaskAllocator, Index, IndexAllocator, RingAllocator, Snapshot,
};
pub use ports::{stash_key, SnapshotStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
