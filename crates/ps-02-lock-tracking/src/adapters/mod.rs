//! # Adapters
//!
//! In-process lock service.

pub mod local;

pub use local::LocalLockService;
