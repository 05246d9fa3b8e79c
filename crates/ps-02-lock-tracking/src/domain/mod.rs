//! # Domain Module
//!
//! Lock bookkeeping (owner side) and lock arbitration (Root side).

pub mod authority;
pub mod invariants;
pub mod tracker;

pub use authority::*;
pub use invariants::*;
pub use tracker::*;
