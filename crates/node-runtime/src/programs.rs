//! Built-in owner programs.

use async_trait::async_trait;
use ps_03_clock::ClockTick;
use ps_04_node_roles::{OwnerProgram, OwnerState, Step};
use shared_types::{Reference, SpaceError, TimeStamp, TypeId, TypeInstance, MPO};
use tracing::debug;

/// Element of the root object holding the heartbeat count.
pub const BEAT_TYPE: TypeId = TypeId::make_context(1, 1);

/// Reference to the beat counter under `root`.
pub fn beat_element(root: &Reference) -> Reference {
    root.with_type_instance(TypeInstance::new(BEAT_TYPE, 0))
}

/// Decode a stored beat count. Unwritten counters read as zero.
pub fn decode_beats(bytes: &[u8]) -> u32 {
    bytes
        .try_into()
        .map(u32::from_le_bytes)
        .unwrap_or_default()
}

/// Counts cycles into its root object.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    limit: Option<u32>,
}

impl Heartbeat {
    /// Beat forever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `limit` beats.
    pub fn with_limit(limit: u32) -> Self {
        Self { limit: Some(limit) }
    }
}

#[async_trait]
impl OwnerProgram for Heartbeat {
    async fn step(&mut self, owner: &mut OwnerState, tick: ClockTick) -> Result<Step, SpaceError> {
        let counter = beat_element(&owner.root());
        let beats = decode_beats(&owner.read(&counter).await?) + 1;
        owner.write(&counter, beats.to_le_bytes().to_vec()).await?;
        debug!(mpo = %owner.mpo(), beats, cycle = tick.cycle, "[node] heartbeat");

        match self.limit {
            Some(limit) if beats >= limit => Ok(Step::Stop),
            _ => Ok(Step::Continue),
        }
    }
}

/// Writes the current cycle into another owner's beat counter every cycle.
///
/// Each write is committed when the lock is released and lands at the
/// target's next cycle, whichever process hosts it.
#[derive(Debug, Clone)]
pub struct Poke {
    target: MPO,
    cycles: TimeStamp,
}

impl Poke {
    /// Poke `target` for `cycles` cycles.
    pub fn new(target: MPO, cycles: TimeStamp) -> Self {
        Self { target, cycles }
    }
}

#[async_trait]
impl OwnerProgram for Poke {
    async fn step(&mut self, owner: &mut OwnerState, tick: ClockTick) -> Result<Step, SpaceError> {
        let root = owner.get_root(self.target).await?;
        owner
            .write(&beat_element(&root), tick.cycle.to_le_bytes().to_vec())
            .await?;
        Ok(if tick.cycle >= self.cycles {
            Step::Stop
        } else {
            Step::Continue
        })
    }
}
