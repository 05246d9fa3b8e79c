//! # Domain Module
//!
//! Clock, cycle guard and clock errors.

pub mod clock;
pub mod cycle;
pub mod errors;

pub use clock::*;
pub use cycle::*;
pub use errors::*;
