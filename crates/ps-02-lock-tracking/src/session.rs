//! # Lock Session
//!
//! Owner-side lock discipline for one activity.
//!
//! ```text
//! read(target) ──► tracker has it? ──yes──► done
//!                        │ no
//!                        ▼
//!                 LockService::acquire_read ──► tracker.on_read
//!
//! cycle end ──► take_releases() ──► writes (with Transaction) then reads
//!                                   ──► flush_releases(service)
//! ```
//!
//! Taking the releases is synchronous so it can run from a scope guard's
//! `Drop`; the network half (`flush_releases`) runs before the next cycle.

use crate::domain::LockTracker;
use crate::ports::LockService;
use shared_types::{LockError, MemoryRecord, SpaceError, TimeStamp, Transaction, MPO};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A lock release waiting to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRelease {
    /// Locked owner.
    pub target: MPO,
    /// Cycle the lock was granted at.
    pub cycle: TimeStamp,
    /// Writes to commit; empty for read locks.
    pub transaction: Transaction,
}

/// Lock tracker plus the writes recorded under its write locks.
#[derive(Debug)]
pub struct LockSession {
    owner: MPO,
    tracker: LockTracker,
    records: BTreeMap<MPO, Vec<MemoryRecord>>,
}

impl LockSession {
    /// Session for `owner`.
    pub fn new(owner: MPO) -> Self {
        Self {
            owner,
            tracker: LockTracker::new(),
            records: BTreeMap::new(),
        }
    }

    /// Owning MPO.
    pub fn owner(&self) -> MPO {
        self.owner
    }

    /// Current bookkeeping.
    pub fn tracker(&self) -> &LockTracker {
        &self.tracker
    }

    /// Ensure a read lock on `target`. Skips the request when any lock on
    /// `target` is already held or `target` is the owner itself.
    pub async fn read<S: LockService + ?Sized>(
        &mut self,
        service: &mut S,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        if target == self.owner || self.tracker.lock_cycle(target) != 0 {
            return Ok(());
        }
        service.acquire_read(self.owner, target, cycle).await?;
        self.tracker.on_read(target, cycle);
        Ok(())
    }

    /// Ensure a write lock on `target`, upgrading a held read lock.
    pub async fn write<S: LockService + ?Sized>(
        &mut self,
        service: &mut S,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        if target == self.owner || self.tracker.is_write(target) != 0 {
            return Ok(());
        }
        service.acquire_write(self.owner, target, cycle).await?;
        self.tracker.on_write(target, cycle);
        Ok(())
    }

    /// Queue a write to another owner. Requires a held write lock.
    pub fn record(&mut self, record: MemoryRecord) -> Result<(), LockError> {
        let target = record.address.mpo;
        if self.tracker.is_write(target) == 0 {
            return Err(LockError::NotHeld {
                requester: self.owner,
                target,
            });
        }
        self.records.entry(target).or_default().push(record);
        Ok(())
    }

    /// Writes queued against `target`.
    pub fn recorded(&self, target: MPO) -> &[MemoryRecord] {
        self.records.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Turn every held lock into a pending release and reset.
    ///
    /// Write locks come first, each carrying its transaction, then read
    /// locks, both in MPO order.
    pub fn take_releases(&mut self) -> Vec<PendingRelease> {
        let owner = self.owner;
        let held = self.tracker.writes().len() + self.tracker.reads().len();
        let mut releases = Vec::with_capacity(held);

        for (&target, &cycle) in self.tracker.writes() {
            let records = self.records.remove(&target).unwrap_or_default();
            releases.push(PendingRelease {
                target,
                cycle,
                transaction: Transaction {
                    source: owner,
                    cycle,
                    records,
                },
            });
        }
        for (&target, &cycle) in self.tracker.reads() {
            releases.push(PendingRelease {
                target,
                cycle,
                transaction: Transaction::empty(owner, cycle),
            });
        }

        if !self.records.is_empty() {
            warn!(%owner, targets = self.records.len(), "[ps-02] discarding writes without a lock");
            self.records.clear();
        }
        self.tracker.reset();
        releases
    }

    /// Release every held lock through `service`.
    pub async fn release_all<S: LockService + ?Sized>(
        &mut self,
        service: &mut S,
    ) -> Result<usize, SpaceError> {
        let releases = self.take_releases();
        flush_releases(service, self.owner, releases).await
    }
}

/// Send pending releases in order.
///
/// Every release is attempted; the first error is returned after the rest
/// have been sent.
pub async fn flush_releases<S: LockService + ?Sized>(
    service: &mut S,
    owner: MPO,
    releases: Vec<PendingRelease>,
) -> Result<usize, SpaceError> {
    let count = releases.len();
    let mut first_error = None;

    for release in releases {
        let target = release.target;
        if let Err(error) = service
            .release(owner, target, release.cycle, release.transaction)
            .await
        {
            warn!(%owner, %target, %error, "[ps-02] lock release failed");
            first_error.get_or_insert(error);
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => {
            debug!(%owner, count, "[ps-02] locks released");
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalLockService;
    use crate::domain::LockKind;
    use shared_types::NetworkAddress;

    const A: MPO = MPO::new(0, 1, 1);
    const B: MPO = MPO::new(0, 1, 2);
    const T: MPO = MPO::new(0, 2, 0);
    const U: MPO = MPO::new(0, 2, 1);

    fn record(target: MPO, byte: u8) -> MemoryRecord {
        MemoryRecord {
            address: NetworkAddress::make_root(target),
            data: vec![byte],
        }
    }

    #[tokio::test]
    async fn test_redundant_requests_skipped() {
        let mut service = LocalLockService::new();
        let mut session = LockSession::new(A);

        session.read(&mut service, T, 1).await.unwrap();
        // A second read would be a Duplicate at the authority.
        session.read(&mut service, T, 1).await.unwrap();
        session.write(&mut service, T, 1).await.unwrap();
        session.write(&mut service, T, 1).await.unwrap();
        session.read(&mut service, T, 1).await.unwrap();

        assert_eq!(session.tracker().is_write(T), 1);
        assert_eq!(service.holders(T), Some((LockKind::Write, vec![A])));
    }

    #[tokio::test]
    async fn test_self_access_not_requested() {
        let mut service = LocalLockService::new();
        let mut session = LockSession::new(A);
        session.write(&mut service, A, 1).await.unwrap();
        assert!(session.tracker().is_empty());
        assert_eq!(service.locked_targets(), 0);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_as_lock_error() {
        let mut service = LocalLockService::new();
        let mut first = LockSession::new(A);
        let mut second = LockSession::new(B);

        first.write(&mut service, T, 1).await.unwrap();
        let err = second.read(&mut service, T, 1).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, SpaceError::Lock(LockError::Conflict { .. })));
        assert!(second.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_record_requires_write_lock() {
        let mut service = LocalLockService::new();
        let mut session = LockSession::new(A);
        assert!(session.record(record(T, 1)).is_err());

        session.read(&mut service, T, 1).await.unwrap();
        assert!(session.record(record(T, 1)).is_err());

        session.write(&mut service, T, 1).await.unwrap();
        session.record(record(T, 1)).unwrap();
        assert_eq!(session.recorded(T).len(), 1);
    }

    #[tokio::test]
    async fn test_release_order_and_commit() {
        let mut service = LocalLockService::new();
        let mut session = LockSession::new(A);

        session.read(&mut service, U, 4).await.unwrap();
        session.write(&mut service, T, 4).await.unwrap();
        session.record(record(T, 7)).unwrap();
        session.record(record(T, 8)).unwrap();

        let releases = session.take_releases();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].target, T);
        assert_eq!(releases[0].transaction.records.len(), 2);
        assert_eq!(releases[1].target, U);
        assert!(releases[1].transaction.is_empty());
        assert!(session.tracker().is_empty());

        let released = flush_releases(&mut service, A, releases).await.unwrap();
        assert_eq!(released, 2);
        assert_eq!(service.locked_targets(), 0);

        let committed = service.take_transactions(T);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].source, A);
        assert_eq!(committed[0].cycle, 4);
        assert_eq!(committed[0].records[1].data, vec![8]);
        assert!(service.take_transactions(U).is_empty());
    }

    #[tokio::test]
    async fn test_release_all_frees_authority() {
        let mut service = LocalLockService::new();
        let mut first = LockSession::new(A);
        let mut second = LockSession::new(B);

        first.write(&mut service, T, 1).await.unwrap();
        assert_eq!(first.release_all(&mut service).await.unwrap(), 1);
        second.write(&mut service, T, 2).await.unwrap();
        assert_eq!(service.holders(T), Some((LockKind::Write, vec![B])));
    }

    #[tokio::test]
    async fn test_flush_reports_first_error_after_trying_all() {
        let mut service = LocalLockService::new();
        let mut session = LockSession::new(A);
        session.read(&mut service, T, 1).await.unwrap();
        session.read(&mut service, U, 1).await.unwrap();

        let mut releases = session.take_releases();
        releases[0].cycle = 9;

        let err = flush_releases(&mut service, A, releases).await.unwrap_err();
        assert!(matches!(err, SpaceError::Lock(LockError::StaleGrant { .. })));
        assert!(service.holders(U).is_none());
        assert!(service.holders(T).is_some());
    }
}
