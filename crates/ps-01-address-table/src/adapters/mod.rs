//! # Adapters
//!
//! Heap registry and snapshot store implementations.

pub mod heap_registry;
pub mod snapshot_store;

pub use heap_registry::HeapRegistry;
pub use snapshot_store::{FileSnapshotStore, InMemorySnapshotStore};
