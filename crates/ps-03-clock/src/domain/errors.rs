//! Clock errors.

use shared_types::MPO;
use thiserror::Error;

/// Errors raised by the process clock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The clock task has stopped.
    #[error("Process clock stopped")]
    Stopped,

    /// Owner is not registered with the clock.
    #[error("Owner {0} is not registered with the process clock")]
    NotRegistered(MPO),

    /// Owner already waits for a tick.
    #[error("Owner {0} already waits for a tick")]
    AlreadyWaiting(MPO),
}
