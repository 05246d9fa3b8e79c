//! # Machine / Process / Owner Coordinates
//!
//! `MP` names a process slot on a machine; `MPO` adds the owner slot and
//! names one simulation partition. Text forms are `"m.p"` and `"m.p.o"`.

use crate::errors::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine identifier, assigned by the root on daemon enrolment.
pub type MachineId = u32;

/// Process slot on a machine.
pub type ProcessId = u16;

/// Owner slot in a process.
pub type OwnerId = u8;

/// Process slots available per machine.
pub const MAX_PROCESS_PER_MACHINE: usize = 16;

/// Owner slots available per process.
pub const MAX_OWNER_PER_PROCESS: usize = 256;

/// Machine/process pair.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MP {
    /// Machine.
    pub machine: MachineId,
    /// Process slot.
    pub process: ProcessId,
}

impl MP {
    /// Create a machine/process pair.
    pub const fn new(machine: MachineId, process: ProcessId) -> Self {
        Self { machine, process }
    }
}

/// Machine/process/owner triple. Ordered by machine, process, then owner.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MPO {
    /// Machine.
    pub machine: MachineId,
    /// Process slot.
    pub process: ProcessId,
    /// Owner slot.
    pub owner: OwnerId,
}

impl MPO {
    /// Create an owner coordinate.
    pub const fn new(machine: MachineId, process: ProcessId, owner: OwnerId) -> Self {
        Self {
            machine,
            process,
            owner,
        }
    }

    /// Owner `owner` inside process `mp`.
    pub const fn from_mp(mp: MP, owner: OwnerId) -> Self {
        Self::new(mp.machine, mp.process, owner)
    }

    /// The hosting process.
    pub const fn mp(&self) -> MP {
        MP::new(self.machine, self.process)
    }
}

impl From<MPO> for MP {
    fn from(mpo: MPO) -> Self {
        mpo.mp()
    }
}

impl fmt::Display for MP {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.machine, self.process)
    }
}

impl fmt::Display for MPO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.machine, self.process, self.owner)
    }
}

fn parse_field<T: FromStr>(text: &str, field: &str, whole: &str) -> Result<T, AddressError>
where
    T::Err: fmt::Display,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| AddressError::Malformed(format!("{field} in '{whole}': {e}")))
}

impl FromStr for MP {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 2 {
            return Err(AddressError::Malformed(format!(
                "expected 'machine.process', got '{s}'"
            )));
        }
        Ok(Self::new(
            parse_field(parts[0], "machine", s)?,
            parse_field(parts[1], "process", s)?,
        ))
    }
}

impl FromStr for MPO {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(AddressError::Malformed(format!(
                "expected 'machine.process.owner', got '{s}'"
            )));
        }
        Ok(Self::new(
            parse_field(parts[0], "machine", s)?,
            parse_field(parts[1], "process", s)?,
            parse_field(parts[2], "owner", s)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mpo() {
        let mpo: MPO = "1.2.3".parse().unwrap();
        assert_eq!(mpo.machine, 1);
        assert_eq!(mpo.process, 2);
        assert_eq!(mpo.owner, 3);
        assert_eq!(mpo.to_string(), "1.2.3");
    }

    #[test]
    fn test_parse_mp() {
        let mp: MP = "0.1".parse().unwrap();
        assert_eq!(mp, MP::new(0, 1));
        assert_eq!(mp.to_string(), "0.1");
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!("1.2".parse::<MPO>().is_err());
        assert!("1.2.3".parse::<MP>().is_err());
        assert!("".parse::<MP>().is_err());
    }

    #[test]
    fn test_parse_rejects_owner_overflow() {
        let err = "1.2.256".parse::<MPO>().unwrap_err();
        assert!(err.to_string().contains("owner"));
    }

    #[test]
    fn test_ordering_is_machine_process_owner() {
        let mut all = vec![MPO::new(1, 0, 0), MPO::new(0, 2, 1), MPO::new(0, 2, 0)];
        all.sort();
        assert_eq!(
            all,
            vec![MPO::new(0, 2, 0), MPO::new(0, 2, 1), MPO::new(1, 0, 0)]
        );
    }

    #[test]
    fn test_mp_of_mpo() {
        let mpo = MPO::from_mp(MP::new(4, 5), 6);
        assert_eq!(mpo.mp(), MP::new(4, 5));
        assert_eq!(MP::from(mpo), MP::new(4, 5));
    }
}
