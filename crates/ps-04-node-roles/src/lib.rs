//! # PS-04 Node Roles
//!
//! The five node roles of a partition space and the owners they run.
//!
//! **Subsystem ID:** 04
//!
//! ## Purpose
//!
//! - `RootNode`: machine, process, owner and object registry; lock
//!   authority; transaction journal; stash and snapshot storage
//! - `DaemonNode` / `LeafNode`: enrolment and upward forwarding
//! - `Executor`: runs owner programs as tasks over a shared process heap
//! - `Tool`: cluster queries and a single hand-stepped owner
//! - `OwnerContext`: explicit per-owner state (clock, locks, link to Root)
//!
//! ## Module Structure
//!
//! ```text
//! ps-04-node-roles/
//! ├── domain/          # RootRegistry, TransactionJournal, ProcessHeap
//! ├── owner/           # OwnerContext, OwnerState, RootLink, OwnerProgram
//! ├── ports/           # NodeContext
//! └── roles/           # Root, Daemon, Leaf, Executor, Tool
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod owner;
pub mod ports;
pub mod roles;

// Re-exports
pub use domain::{ProcessHeap, RootRegistry, TransactionJournal};
pub use owner::{OwnerContext, OwnerProgram, OwnerState, RootLink, Step};
pub use ports::NodeContext;
pub use roles::executor::ExecutorError;
pub use roles::{
    list_subtree, node_status, DaemonNode, Executor, ExecutorContext, LeafNode, NodeHandler,
    RootNode, Tool, ToolContext,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
