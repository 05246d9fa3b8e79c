//! Per-activity lock bookkeeping.
//!
//! A `LockTracker` records which owners the current activity holds locks
//! on and the cycle each lock was granted at. It never talks to the
//! authority; it only remembers what the authority granted.

use shared_types::{TimeStamp, MPO};
use std::collections::BTreeMap;

/// Read/write lock bookkeeping of one activity.
///
/// `reads` and `writes` are disjoint: a write supersedes a read on the same
/// owner. Both maps are ordered by MPO so release order is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockTracker {
    reads: BTreeMap<MPO, TimeStamp>,
    writes: BTreeMap<MPO, TimeStamp>,
}

impl LockTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read lock. No-op while a write lock on `mpo` is held.
    pub fn on_read(&mut self, mpo: MPO, cycle: TimeStamp) {
        if self.writes.contains_key(&mpo) {
            return;
        }
        self.reads.insert(mpo, cycle);
    }

    /// Record a write lock, replacing any read lock on `mpo`.
    pub fn on_write(&mut self, mpo: MPO, cycle: TimeStamp) {
        self.reads.remove(&mpo);
        self.writes.insert(mpo, cycle);
    }

    /// Forget any lock on `mpo`.
    pub fn on_release(&mut self, mpo: MPO) {
        self.reads.remove(&mpo);
        self.writes.remove(&mpo);
    }

    /// Forget every lock.
    pub fn reset(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    /// Cycle the read lock on `mpo` was granted at, 0 when no read lock is
    /// held. A write lock on `mpo` reports 0 here.
    pub fn is_read(&self, mpo: MPO) -> TimeStamp {
        self.reads.get(&mpo).copied().unwrap_or(0)
    }

    /// Cycle the write lock on `mpo` was granted at, 0 when none is held.
    pub fn is_write(&self, mpo: MPO) -> TimeStamp {
        self.writes.get(&mpo).copied().unwrap_or(0)
    }

    /// Cycle the lock on `mpo` was granted at, 0 when none is held.
    pub fn lock_cycle(&self, mpo: MPO) -> TimeStamp {
        self.writes
            .get(&mpo)
            .or_else(|| self.reads.get(&mpo))
            .copied()
            .unwrap_or(0)
    }

    /// Read locks ordered by MPO.
    pub fn reads(&self) -> &BTreeMap<MPO, TimeStamp> {
        &self.reads
    }

    /// Write locks ordered by MPO.
    pub fn writes(&self) -> &BTreeMap<MPO, TimeStamp> {
        &self.writes
    }

    /// True when no lock is held.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}
