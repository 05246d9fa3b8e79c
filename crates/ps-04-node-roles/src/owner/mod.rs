//! Owners: explicit per-owner context and the programs executors run.

pub mod context;
pub mod program;

pub use context::{OwnerContext, OwnerState, RootLink};
pub use program::{OwnerProgram, Step};
