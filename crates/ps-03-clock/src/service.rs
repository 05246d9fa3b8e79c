//! # Process Clock
//!
//! Tick source shared by the owners of one process.
//!
//! ```text
//! owner ── register ──────────┐
//! owner ── request_clock ─────┤   ┌──────────────┐
//! owner ── unrequest_clock ───┼──►│ clock task   │── ClockTick ──► waiting owners
//! owner ── unregister ────────┘   └──────────────┘
//! ```
//!
//! A tick is issued once every registered owner that is not new waits for
//! it and the tick interval has elapsed since the previous tick. An owner
//! is new from `register` until its first `request_clock`, so a freshly
//! constructed owner never stalls the others.

use crate::domain::{Clock, ClockError, ClockTick};
use shared_types::MPO;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

type TickReply = oneshot::Sender<Result<ClockTick, ClockError>>;

enum ClockCommand {
    Register(MPO),
    Unregister(MPO),
    Request { owner: MPO, reply: TickReply },
    Unrequest(MPO),
}

#[derive(Default)]
struct OwnerSlot {
    new: bool,
    waiting: Option<TickReply>,
}

/// Handle to a running process clock. Clones share the same clock task,
/// which stops when the last handle is dropped.
#[derive(Clone)]
pub struct ProcessClock {
    commands: mpsc::UnboundedSender<ClockCommand>,
}

impl ProcessClock {
    /// Spawn the clock task on the current runtime.
    pub fn spawn(interval: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = ClockTask {
            interval,
            clock: Clock::new(),
            owners: BTreeMap::new(),
            last_tick: None,
        };
        tokio::spawn(task.run(receiver));
        info!(interval_ms = interval.as_millis() as u64, "[ps-03] process clock started");
        Self { commands }
    }

    fn send(&self, command: ClockCommand) -> Result<(), ClockError> {
        self.commands
            .send(command)
            .map_err(|_| ClockError::Stopped)
    }

    /// Add an owner. It does not block ticks until its first request.
    pub fn register(&self, owner: MPO) -> Result<(), ClockError> {
        self.send(ClockCommand::Register(owner))
    }

    /// Remove an owner, failing its pending request if any.
    pub fn unregister(&self, owner: MPO) -> Result<(), ClockError> {
        self.send(ClockCommand::Unregister(owner))
    }

    /// Wait for the next tick.
    pub async fn request_clock(&self, owner: MPO) -> Result<ClockTick, ClockError> {
        let (reply, tick) = oneshot::channel();
        self.send(ClockCommand::Request { owner, reply })?;
        tick.await.map_err(|_| ClockError::Stopped)?
    }

    /// Withdraw a pending request. The owner blocks ticks again until it
    /// requests.
    pub fn unrequest_clock(&self, owner: MPO) -> Result<(), ClockError> {
        self.send(ClockCommand::Unrequest(owner))
    }
}

struct ClockTask {
    interval: Duration,
    clock: Clock,
    owners: BTreeMap<MPO, OwnerSlot>,
    last_tick: Option<Instant>,
}

impl ClockTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ClockCommand>) {
        loop {
            let deadline = self.deadline();
            let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                _ = sleep, if deadline.is_some() => self.tick(),
            }
        }
        debug!("[ps-03] process clock stopped");
    }

    fn apply(&mut self, command: ClockCommand) {
        match command {
            ClockCommand::Register(owner) => {
                self.owners.entry(owner).or_insert(OwnerSlot {
                    new: true,
                    waiting: None,
                });
                debug!(%owner, "[ps-03] owner registered");
            }
            ClockCommand::Unregister(owner) => {
                if let Some(slot) = self.owners.remove(&owner) {
                    if let Some(reply) = slot.waiting {
                        let _ = reply.send(Err(ClockError::NotRegistered(owner)));
                    }
                    debug!(%owner, "[ps-03] owner unregistered");
                }
            }
            ClockCommand::Request { owner, reply } => match self.owners.get_mut(&owner) {
                None => {
                    let _ = reply.send(Err(ClockError::NotRegistered(owner)));
                }
                Some(slot) if slot.waiting.is_some() => {
                    let _ = reply.send(Err(ClockError::AlreadyWaiting(owner)));
                }
                Some(slot) => {
                    slot.new = false;
                    slot.waiting = Some(reply);
                }
            },
            ClockCommand::Unrequest(owner) => {
                if let Some(slot) = self.owners.get_mut(&owner) {
                    slot.waiting = None;
                }
            }
        }
    }

    /// When the next tick may fire, or `None` while an owner is busy.
    fn deadline(&self) -> Option<Instant> {
        let mut any_waiting = false;
        for slot in self.owners.values() {
            match (&slot.waiting, slot.new) {
                (Some(_), _) => any_waiting = true,
                (None, true) => {}
                (None, false) => return None,
            }
        }
        if !any_waiting {
            return None;
        }
        Some(match self.last_tick {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    fn tick(&mut self) {
        let tick = self.clock.tick();
        let mut woken = 0usize;
        for slot in self.owners.values_mut() {
            if let Some(reply) = slot.waiting.take() {
                if reply.send(Ok(tick)).is_ok() {
                    woken += 1;
                }
            }
        }
        self.clock.advance();
        self.last_tick = Some(Instant::now());
        debug!(cycle = tick.cycle, woken, "[ps-03] tick");
    }
}
