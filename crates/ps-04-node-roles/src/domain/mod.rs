//! Domain layer: registry, journal and heap state.

pub mod heap;
pub mod journal;
pub mod registry;

pub use heap::{OwnerImage, ProcessHeap};
pub use journal::TransactionJournal;
pub use registry::{RootRegistry, MAX_ALLOCATIONS_PER_OWNER};
