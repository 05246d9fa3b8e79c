//! # Ports
//!
//! Dependency traits of the address-table subsystem.

pub mod outbound;

pub use outbound::{stash_key, SnapshotStore};
