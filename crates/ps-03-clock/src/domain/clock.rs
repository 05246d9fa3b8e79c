//! Logical cycle counter.

use serde::{Deserialize, Serialize};
use shared_types::TimeStamp;
use std::time::Instant;

/// First cycle of every clock.
pub const FIRST_CYCLE: TimeStamp = 1;

/// Time of one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockTick {
    /// Cycle number.
    pub cycle: TimeStamp,
    /// Seconds from clock start to this cycle's start.
    pub ct: f64,
    /// Seconds from the previous cycle's start to this one's.
    pub dt: f64,
}

/// Monotonic cycle counter with wall-clock deltas.
#[derive(Clone, Debug)]
pub struct Clock {
    start: Instant,
    last: Instant,
    cycle: TimeStamp,
    ct: f64,
    dt: f64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Clock at cycle 1.
    pub fn new() -> Self {
        Self::starting_at(FIRST_CYCLE)
    }

    /// Clock resuming at `cycle`, e.g. after a snapshot load.
    pub fn starting_at(cycle: TimeStamp) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            cycle: cycle.max(FIRST_CYCLE),
            ct: 0.0,
            dt: 0.0,
        }
    }

    /// Current cycle.
    pub fn cycle(&self) -> TimeStamp {
        self.cycle
    }

    /// Seconds since start at this cycle's start.
    pub fn ct(&self) -> f64 {
        self.ct
    }

    /// Length of the previous cycle in seconds.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Snapshot of the current cycle.
    pub fn tick(&self) -> ClockTick {
        ClockTick {
            cycle: self.cycle,
            ct: self.ct,
            dt: self.dt,
        }
    }

    /// Move to the next cycle.
    pub fn advance(&mut self) -> ClockTick {
        let now = Instant::now();
        self.dt = now.duration_since(self.last).as_secs_f64();
        self.ct = now.duration_since(self.start).as_secs_f64();
        self.last = now;
        self.cycle = self.cycle.saturating_add(1);
        self.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        let clock = Clock::new();
        assert_eq!(clock.cycle(), 1);
        assert_eq!(clock.ct(), 0.0);
        assert_eq!(clock.dt(), 0.0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut clock = Clock::new();
        let mut previous = clock.tick();
        for _ in 0..5 {
            let next = clock.advance();
            assert_eq!(next.cycle, previous.cycle + 1);
            assert!(next.ct >= previous.ct);
            assert!(next.dt >= 0.0);
            previous = next;
        }
        assert_eq!(clock.cycle(), 6);
    }

    #[test]
    fn test_resume_never_below_first() {
        assert_eq!(Clock::starting_at(0).cycle(), FIRST_CYCLE);
        assert_eq!(Clock::starting_at(40).cycle(), 40);
    }

    #[test]
    fn test_tick_serializes() {
        let tick = ClockTick {
            cycle: 3,
            ct: 0.5,
            dt: 0.25,
        };
        let json = serde_json::to_string(&tick).unwrap();
        let back: ClockTick = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tick);
    }
}
