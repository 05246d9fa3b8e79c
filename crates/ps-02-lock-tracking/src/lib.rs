//! # PS-02 Lock Tracking
//!
//! Read/write lock discipline over owners.
//!
//! **Subsystem ID:** 02
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! - `LockTracker`: what one activity holds, and since which cycle
//! - `LockAuthority`: Root's lock table, one writer XOR many readers per owner
//! - `LockSession`: owner-side discipline that skips redundant requests and
//!   releases everything (writes with their transaction first) at cycle end
//!
//! ## Lock Rules
//!
//! | Held by others | Read request | Write request |
//! |----------------|--------------|---------------|
//! | nothing        | granted      | granted       |
//! | readers        | granted      | `Conflict`    |
//! | sole reader = requester | `Duplicate` | upgraded |
//! | writer         | `Conflict`   | `Conflict`    |
//!
//! Access to the requester's own owner is always granted and never recorded.
//!
//! ## Module Structure
//!
//! ```text
//! ps-02-lock-tracking/
//! ├── domain/          # LockTracker, LockAuthority, invariants
//! ├── ports/           # LockService
//! ├── adapters/        # LocalLockService
//! └── session.rs       # LockSession, PendingRelease, flush_releases
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod session;

// Re-exports
pub use adapters::LocalLockService;
pub use domain::{
    invariant_cycles_nonzero, invariant_disjoint, LockAuthority, LockGrant, LockKind, LockTracker,
};
pub use ports::LockService;
pub use session::{flush_releases, LockSession, PendingRelease};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
