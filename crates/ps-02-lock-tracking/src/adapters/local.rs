//! In-process lock service.
//!
//! Wraps a shared `LockAuthority` and a per-target journal of committed
//! transactions. Clones share state, so several sessions can contend on
//! the same authority.

use crate::domain::{LockAuthority, LockKind};
use crate::ports::LockService;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{SpaceError, TimeStamp, Transaction, MPO};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Lock service backed by a local authority.
#[derive(Clone, Default)]
pub struct LocalLockService {
    authority: Arc<Mutex<LockAuthority>>,
    journal: Arc<Mutex<BTreeMap<MPO, Vec<Transaction>>>>,
}

impl LocalLockService {
    /// Fresh authority with an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the transactions committed against `target`, oldest first.
    pub fn take_transactions(&self, target: MPO) -> Vec<Transaction> {
        self.journal.lock().remove(&target).unwrap_or_default()
    }

    /// Number of locked targets.
    pub fn locked_targets(&self) -> usize {
        self.authority.lock().len()
    }

    /// Mode and holders of the lock on `target`.
    pub fn holders(&self, target: MPO) -> Option<(LockKind, Vec<MPO>)> {
        self.authority.lock().holders(target)
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire_read(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        self.authority.lock().acquire_read(requester, target, cycle)?;
        Ok(())
    }

    async fn acquire_write(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        self.authority
            .lock()
            .acquire_write(requester, target, cycle)?;
        Ok(())
    }

    async fn release(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
        transaction: Transaction,
    ) -> Result<(), SpaceError> {
        let kind = self.authority.lock().release(requester, target, cycle)?;
        if transaction.is_empty() {
            return Ok(());
        }
        if kind == Some(LockKind::Write) {
            self.journal
                .lock()
                .entry(target)
                .or_default()
                .push(transaction);
        } else {
            warn!(%requester, %target, "[ps-02] dropping writes released without a write lock");
        }
        Ok(())
    }
}
