//! Cluster registry kept by Root.
//!
//! ```text
//! machine ──► process slots (16, lowest free first)
//!               └──► owner slots (256, freed slots recycled oldest first)
//!                      └──► allocation ids (65536, 0 = root object)
//! ```

use ps_01_address_table::{BitmaskAllocator, IndexAllocator, RingAllocator};
use shared_types::{
    AddressError, AllocationId, MachineId, NetworkAddress, TypeId, TypeInstance, MP,
    MAX_OWNER_PER_PROCESS, MAX_PROCESS_PER_MACHINE, MPO, ROOT_ALLOCATION_ID,
};
use std::collections::BTreeMap;

/// Allocation ids per owner.
pub const MAX_ALLOCATIONS_PER_OWNER: usize = 1 << 16;

#[derive(Debug)]
struct OwnerRecord {
    allocations: RingAllocator,
    objects: BTreeMap<AllocationId, TypeId>,
}

/// Enrolment and allocation state of the whole cluster.
#[derive(Debug, Default)]
pub struct RootRegistry {
    next_machine: MachineId,
    machines: BTreeMap<MachineId, BitmaskAllocator<MAX_PROCESS_PER_MACHINE>>,
    processes: BTreeMap<MP, RingAllocator>,
    owners: BTreeMap<MPO, OwnerRecord>,
}

impl RootRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // ENROLMENT
    // =========================================================================

    /// Hand out the next machine id.
    pub fn enrole_machine(&mut self) -> MachineId {
        let machine = self.next_machine;
        self.next_machine = self.next_machine.wrapping_add(1);
        self.machines.insert(machine, BitmaskAllocator::new());
        machine
    }

    /// Take a process slot on `machine`.
    pub fn enrole_process(&mut self, machine: MachineId) -> Result<MP, AddressError> {
        let slots = self
            .machines
            .get_mut(&machine)
            .ok_or_else(|| AddressError::NotAllocated(format!("machine {machine}")))?;
        let process = slots.allocate().ok_or_else(|| AddressError::Exhausted {
            what: format!("process slots of machine {machine}"),
            capacity: MAX_PROCESS_PER_MACHINE,
        })?;

        let mp = MP::new(machine, process as u16);
        self.processes
            .insert(mp, RingAllocator::new(MAX_OWNER_PER_PROCESS));
        Ok(mp)
    }

    /// Free a process slot and every owner in it. Returns the owners dropped.
    pub fn retire_process(&mut self, mp: MP) -> Result<Vec<MPO>, AddressError> {
        if self.processes.remove(&mp).is_none() {
            return Err(AddressError::NotAllocated(format!("process {mp}")));
        }
        if let Some(slots) = self.machines.get_mut(&mp.machine) {
            slots.free(mp.process as usize);
        }
        let dropped: Vec<MPO> = self
            .owners
            .keys()
            .filter(|mpo| mpo.mp() == mp)
            .copied()
            .collect();
        for mpo in &dropped {
            self.owners.remove(mpo);
        }
        Ok(dropped)
    }

    // =========================================================================
    // OWNERS
    // =========================================================================

    /// Take an owner slot in `mp` and reserve its root object.
    pub fn construct_owner(&mut self, mp: MP) -> Result<(MPO, NetworkAddress), AddressError> {
        let slots = self
            .processes
            .get_mut(&mp)
            .ok_or_else(|| AddressError::NotAllocated(format!("process {mp}")))?;
        let owner = slots.allocate().ok_or_else(|| AddressError::Exhausted {
            what: format!("owner slots of process {mp}"),
            capacity: MAX_OWNER_PER_PROCESS,
        })?;

        let mpo = MPO::from_mp(mp, owner as u8);
        let mut allocations = RingAllocator::new(MAX_ALLOCATIONS_PER_OWNER);
        allocations.allocate_at(ROOT_ALLOCATION_ID as usize);
        let root = NetworkAddress::make_root(mpo);
        self.owners.insert(
            mpo,
            OwnerRecord {
                allocations,
                objects: BTreeMap::from([(ROOT_ALLOCATION_ID, root.type_instance.type_id)]),
            },
        );
        Ok((mpo, root))
    }

    /// Free an owner slot.
    pub fn destroy_owner(&mut self, mpo: MPO) -> Result<(), AddressError> {
        self.owners
            .remove(&mpo)
            .ok_or_else(|| AddressError::NotAllocated(format!("owner {mpo}")))?;
        if let Some(slots) = self.processes.get_mut(&mpo.mp()) {
            slots.free(mpo.owner as usize);
        }
        Ok(())
    }

    /// True when `mpo` is constructed.
    pub fn is_constructed(&self, mpo: MPO) -> bool {
        self.owners.contains_key(&mpo)
    }

    /// Root object of `mpo`.
    pub fn root(&self, mpo: MPO) -> Result<NetworkAddress, AddressError> {
        if !self.is_constructed(mpo) {
            return Err(AddressError::NotAllocated(format!("owner {mpo}")));
        }
        Ok(NetworkAddress::make_root(mpo))
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    /// Allocate an object of `type_id` in `mpo`.
    pub fn allocate(&mut self, mpo: MPO, type_id: TypeId) -> Result<NetworkAddress, AddressError> {
        let object = TypeInstance::make_object(type_id)?;
        if !object.is_valid() {
            return Err(AddressError::InvalidReference);
        }
        let record = self
            .owners
            .get_mut(&mpo)
            .ok_or_else(|| AddressError::NotAllocated(format!("owner {mpo}")))?;
        let allocation = record
            .allocations
            .allocate()
            .ok_or_else(|| AddressError::Exhausted {
                what: format!("allocation ids of owner {mpo}"),
                capacity: MAX_ALLOCATIONS_PER_OWNER,
            })? as AllocationId;

        record.objects.insert(allocation, object.type_id);
        Ok(NetworkAddress::new(mpo, allocation, object))
    }

    /// Free an allocated object. The root object cannot be freed.
    pub fn deallocate(&mut self, address: NetworkAddress) -> Result<(), AddressError> {
        let object = address.object_address()?;
        if object.allocation_id == ROOT_ALLOCATION_ID {
            return Err(AddressError::NotAllocated(format!(
                "root object of {} is not deallocatable",
                object.mpo
            )));
        }
        let record = self
            .owners
            .get_mut(&object.mpo)
            .ok_or_else(|| AddressError::NotAllocated(format!("owner {}", object.mpo)))?;
        match record.objects.get(&object.allocation_id) {
            Some(type_id) if *type_id == object.type_instance.type_id => {}
            _ => {
                return Err(AddressError::NotAllocated(format!(
                    "object {}:{}",
                    object.mpo, object.allocation_id
                )))
            }
        }
        record.objects.remove(&object.allocation_id);
        record.allocations.free(object.allocation_id as usize);
        Ok(())
    }

    /// Number of live objects of `mpo`, root included.
    pub fn object_count(&self, mpo: MPO) -> usize {
        self.owners.get(&mpo).map_or(0, |r| r.objects.len())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Enroled machines, ascending.
    pub fn machines(&self) -> Vec<MachineId> {
        self.machines.keys().copied().collect()
    }

    /// Processes of `machine`, ascending.
    pub fn processes(&self, machine: MachineId) -> Result<Vec<MP>, AddressError> {
        if !self.machines.contains_key(&machine) {
            return Err(AddressError::NotAllocated(format!("machine {machine}")));
        }
        Ok(self
            .processes
            .keys()
            .filter(|mp| mp.machine == machine)
            .copied()
            .collect())
    }

    /// Owners of `mp`, ascending.
    pub fn owners(&self, mp: MP) -> Result<Vec<MPO>, AddressError> {
        if !self.processes.contains_key(&mp) {
            return Err(AddressError::NotAllocated(format!("process {mp}")));
        }
        Ok(self
            .owners
            .keys()
            .filter(|mpo| mpo.mp() == mp)
            .copied()
            .collect())
    }
}
