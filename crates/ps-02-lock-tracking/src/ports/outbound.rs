//! Outbound ports for lock tracking.

use async_trait::async_trait;
use shared_types::{SpaceError, TimeStamp, Transaction, MPO};

/// Lock authority as seen from an owner.
///
/// Implemented over a conversation to Root in the node roles and over a
/// local `LockAuthority` in tests. Methods take `&mut self` because a
/// conversation carries one outstanding request at a time.
#[async_trait]
pub trait LockService: Send {
    /// Ask for a shared lock on `target`.
    async fn acquire_read(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError>;

    /// Ask for an exclusive lock on `target`.
    async fn acquire_write(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError>;

    /// Give a lock back, committing `transaction` when it was a write lock.
    async fn release(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
        transaction: Transaction,
    ) -> Result<(), SpaceError>;
}
