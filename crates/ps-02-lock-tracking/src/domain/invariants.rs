//! Lock bookkeeping invariants.

use super::tracker::LockTracker;

/// An owner is never both read- and write-locked by the same activity.
pub fn invariant_disjoint(tracker: &LockTracker) -> bool {
    tracker
        .reads()
        .keys()
        .all(|mpo| !tracker.writes().contains_key(mpo))
}

/// No recorded lock carries cycle 0, which means "not held".
pub fn invariant_cycles_nonzero(tracker: &LockTracker) -> bool {
    tracker
        .reads()
        .values()
        .chain(tracker.writes().values())
        .all(|cycle| *cycle != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::MPO;

    #[test]
    fn test_invariants_hold_through_transitions() {
        let mut tracker = LockTracker::new();
        let mpo = MPO::new(0, 0, 1);
        tracker.on_read(mpo, 1);
        tracker.on_write(mpo, 1);
        tracker.on_read(mpo, 2);
        assert!(invariant_disjoint(&tracker));
        assert!(invariant_cycles_nonzero(&tracker));
    }
}
