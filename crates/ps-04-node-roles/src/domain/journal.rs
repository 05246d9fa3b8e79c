//! Committed transactions waiting for their target owner.

use shared_types::{Transaction, MPO};
use std::collections::BTreeMap;

/// Per-target queue of committed transactions, oldest first.
#[derive(Debug, Default)]
pub struct TransactionJournal {
    pending: BTreeMap<MPO, Vec<Transaction>>,
}

impl TransactionJournal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `transaction` for `target`. Empty transactions are dropped.
    pub fn commit(&mut self, target: MPO, transaction: Transaction) -> bool {
        if transaction.is_empty() {
            return false;
        }
        self.pending.entry(target).or_default().push(transaction);
        true
    }

    /// Drain the queue of `target`.
    pub fn take(&mut self, target: MPO) -> Vec<Transaction> {
        self.pending.remove(&target).unwrap_or_default()
    }

    /// Drop everything queued for `owner`. Transactions it committed
    /// against others stay queued.
    pub fn discard(&mut self, owner: MPO) -> usize {
        self.pending.remove(&owner).map_or(0, |queue| queue.len())
    }

    /// Transactions queued for `target`.
    pub fn pending(&self, target: MPO) -> usize {
        self.pending.get(&target).map_or(0, Vec::len)
    }
}
