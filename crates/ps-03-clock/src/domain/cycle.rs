//! Cycle scope guard.
//!
//! ```text
//! let cycle = Cycle::begin(&mut clock, &mut hook);   // cycle N
//! cycle.do_work();                                   // derefs to the hook
//! drop(cycle);  // hook.cycle_complete(tick N); clock -> N+1
//! ```
//!
//! The guard holds `&mut Clock`, so a second cycle cannot begin while one
//! is alive. Completion runs on every exit path, including `?` and panics
//! unwinding through the scope.

use super::clock::{Clock, ClockTick};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Work run when a cycle closes.
pub trait CycleHook {
    /// Called from the guard's `Drop`, before the clock advances.
    fn cycle_complete(&mut self, tick: &ClockTick);

    /// Called when the guard is created.
    fn cycle_begin(&mut self, _tick: &ClockTick) {}
}

/// One logical step. See the module docs.
pub struct Cycle<'a, H: CycleHook + ?Sized> {
    clock: &'a mut Clock,
    hook: &'a mut H,
    tick: ClockTick,
}

impl<'a, H: CycleHook + ?Sized> Cycle<'a, H> {
    /// Open the clock's current cycle.
    pub fn begin(clock: &'a mut Clock, hook: &'a mut H) -> Self {
        let tick = clock.tick();
        hook.cycle_begin(&tick);
        debug!(cycle = tick.cycle, "[ps-03] cycle begin");
        Self { clock, hook, tick }
    }

    /// Time of this cycle.
    pub fn tick(&self) -> ClockTick {
        self.tick
    }

    /// This cycle's number.
    pub fn cycle(&self) -> shared_types::TimeStamp {
        self.tick.cycle
    }
}

impl<H: CycleHook + ?Sized> Deref for Cycle<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &*self.hook
    }
}

impl<H: CycleHook + ?Sized> DerefMut for Cycle<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut *self.hook
    }
}

impl<H: CycleHook + ?Sized> Drop for Cycle<'_, H> {
    fn drop(&mut self) {
        self.hook.cycle_complete(&self.tick);
        self.clock.advance();
        debug!(cycle = self.tick.cycle, "[ps-03] cycle complete");
    }
}
