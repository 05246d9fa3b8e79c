//! # PS-03 Clock
//!
//! Synchronized logical time for owners.
//!
//! **Subsystem ID:** 03
//!
//! ## Purpose
//!
//! - `Clock`: cycle counter starting at 1 with `ct`/`dt` wall-clock deltas
//! - `Cycle`: scope guard that closes a cycle on every exit path and keeps
//!   cycles of one clock strictly sequential
//! - `ProcessClock`: per-process tick source that releases waiting owners
//!   once all established owners are waiting
//!
//! ## Module Structure
//!
//! ```text
//! ps-03-clock/
//! ├── domain/          # Clock, ClockTick, Cycle, CycleHook, ClockError
//! └── service.rs       # ProcessClock
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod service;

// Re-exports
pub use domain::{Clock, ClockError, ClockTick, Cycle, CycleHook, FIRST_CYCLE};
pub use service::ProcessClock;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
