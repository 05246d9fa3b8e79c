//! # Ports
//!
//! The lock service seam between owners and the lock authority.

pub mod outbound;

pub use outbound::LockService;
