//! Root-side lock arbitration.
//!
//! One writer XOR any number of readers per target owner. The authority is
//! the only place conflicts are detected; owners only mirror the grants in
//! their `LockTracker`.

use shared_types::{LockError, TimeStamp, MPO};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Lock mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
        }
    }
}

/// A lock handed out by the authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockGrant {
    /// Locked owner.
    pub target: MPO,
    /// Cycle recorded for the grant.
    pub cycle: TimeStamp,
    /// Mode granted.
    pub kind: LockKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum LockState {
    Read(BTreeMap<MPO, TimeStamp>),
    Write { holder: MPO, cycle: TimeStamp },
}

/// Lock table of the whole cluster, owned by Root.
#[derive(Debug, Default)]
pub struct LockAuthority {
    locks: HashMap<MPO, LockState>,
}

impl LockAuthority {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a shared lock on `target`.
    pub fn acquire_read(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<LockGrant, LockError> {
        let grant = LockGrant {
            target,
            cycle,
            kind: LockKind::Read,
        };
        if requester == target {
            return Ok(grant);
        }

        match self.locks.get_mut(&target) {
            None => {
                self.locks
                    .insert(target, LockState::Read(BTreeMap::from([(requester, cycle)])));
            }
            Some(LockState::Read(readers)) => {
                if readers.contains_key(&requester) {
                    return Err(LockError::Duplicate { requester, target });
                }
                readers.insert(requester, cycle);
            }
            Some(LockState::Write { holder, .. }) => {
                if *holder == requester {
                    return Err(LockError::Duplicate { requester, target });
                }
                return Err(LockError::Conflict {
                    target,
                    holder: *holder,
                });
            }
        }

        debug!(%requester, %target, cycle, "[ps-02] read lock granted");
        Ok(grant)
    }

    /// Grant an exclusive lock on `target`, upgrading the requester's read
    /// lock when it is the only reader.
    pub fn acquire_write(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<LockGrant, LockError> {
        let grant = LockGrant {
            target,
            cycle,
            kind: LockKind::Write,
        };
        if requester == target {
            return Ok(grant);
        }

        match self.locks.get(&target) {
            None => {}
            Some(LockState::Read(readers)) => {
                if readers.contains_key(&requester) {
                    if readers.len() > 1 {
                        return Err(LockError::InvalidUpgrade {
                            target,
                            readers: readers.len() - 1,
                        });
                    }
                } else if let Some(holder) = readers.keys().next() {
                    return Err(LockError::Conflict {
                        target,
                        holder: *holder,
                    });
                }
            }
            Some(LockState::Write { holder, .. }) => {
                if *holder == requester {
                    return Err(LockError::Duplicate { requester, target });
                }
                return Err(LockError::Conflict {
                    target,
                    holder: *holder,
                });
            }
        }

        self.locks.insert(
            target,
            LockState::Write {
                holder: requester,
                cycle,
            },
        );
        debug!(%requester, %target, cycle, "[ps-02] write lock granted");
        Ok(grant)
    }

    /// Release the lock `requester` holds on `target`.
    ///
    /// `cycle` must name the cycle the lock was granted at. Returns `None`
    /// for self-access, which was never recorded.
    pub fn release(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<Option<LockKind>, LockError> {
        if requester == target {
            return Ok(None);
        }

        let not_held = LockError::NotHeld { requester, target };
        let kind = match self.locks.get_mut(&target) {
            None => return Err(not_held),
            Some(LockState::Read(readers)) => {
                let granted = *readers.get(&requester).ok_or(not_held)?;
                if granted != cycle {
                    return Err(LockError::StaleGrant {
                        target,
                        granted,
                        released: cycle,
                    });
                }
                readers.remove(&requester);
                if readers.is_empty() {
                    self.locks.remove(&target);
                }
                LockKind::Read
            }
            Some(LockState::Write {
                holder,
                cycle: granted,
            }) => {
                if *holder != requester {
                    return Err(not_held);
                }
                if *granted != cycle {
                    return Err(LockError::StaleGrant {
                        target,
                        granted: *granted,
                        released: cycle,
                    });
                }
                self.locks.remove(&target);
                LockKind::Write
            }
        };

        debug!(%requester, %target, cycle, kind = %kind, "[ps-02] lock released");
        Ok(Some(kind))
    }

    /// Release every lock `requester` holds, whatever its cycle.
    ///
    /// Returns the released targets in MPO order.
    pub fn release_all(&mut self, requester: MPO) -> Vec<MPO> {
        let mut released = Vec::new();
        self.locks.retain(|target, state| match state {
            LockState::Read(readers) => {
                if readers.remove(&requester).is_some() {
                    released.push(*target);
                }
                !readers.is_empty()
            }
            LockState::Write { holder, .. } => {
                if *holder == requester {
                    released.push(*target);
                    false
                } else {
                    true
                }
            }
        });
        released.sort();
        if !released.is_empty() {
            debug!(%requester, count = released.len(), "[ps-02] all locks released");
        }
        released
    }

    /// Mode and holders of the lock on `target`.
    pub fn holders(&self, target: MPO) -> Option<(LockKind, Vec<MPO>)> {
        self.locks.get(&target).map(|state| match state {
            LockState::Read(readers) => (LockKind::Read, readers.keys().copied().collect()),
            LockState::Write { holder, .. } => (LockKind::Write, vec![*holder]),
        })
    }

    /// True when `target` is locked by anyone.
    pub fn is_locked(&self, target: MPO) -> bool {
        self.locks.contains_key(&target)
    }

    /// Number of locked targets.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when nothing is locked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
