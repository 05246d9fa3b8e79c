//! Owner behaviour run by an executor.

use crate::owner::OwnerState;
use async_trait::async_trait;
use ps_03_clock::ClockTick;
use shared_types::SpaceError;

/// Outcome of one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Run again next cycle.
    Continue,
    /// Destroy the owner.
    Stop,
}

/// Work an owner does once per cycle.
///
/// `owner` is only reachable inside an open cycle, so every read, write and
/// allocation belongs to exactly one cycle. Lock releases are queued when
/// the cycle closes and sent before the next one opens.
#[async_trait]
pub trait OwnerProgram: Send {
    /// Run one cycle.
    async fn step(&mut self, owner: &mut OwnerState, tick: ClockTick) -> Result<Step, SpaceError>;
}
