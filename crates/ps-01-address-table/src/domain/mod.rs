//! # Domain Module
//!
//! Address tables, snapshots and slot allocators.

pub mod address_table;
pub mod allocator;
pub mod invariants;
pub mod snapshot;

pub use address_table::*;
pub use allocator::*;
pub use invariants::*;
pub use snapshot::*;
