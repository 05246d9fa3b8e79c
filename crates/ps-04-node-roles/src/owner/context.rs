//! # Owner Context
//!
//! Everything one owner needs, passed explicitly.
//!
//! ```text
//! OwnerContext ─┬─ Clock            (owner's own cycle counter)
//!               └─ OwnerState ─┬─ ProcessHeap   (shared with the process)
//!                              ├─ LockSession   (locks held this cycle)
//!                              ├─ RootLink      (one conversation to Root)
//!                              └─ pending       (releases queued at cycle end)
//!
//! begin_cycle():  flush pending releases ─► TakeTransactions ─► apply
//!                 ─► Cycle guard (derefs to OwnerState)
//! drop(guard):    LockSession::take_releases ─► pending; clock advances
//! ```
//!
//! Reads of owners hosted in the same process take a read lock and read the
//! shared heap. Writes to other owners take a write lock and are recorded;
//! Root commits them on release and the target applies them at the start
//! of its next cycle.

use crate::domain::ProcessHeap;
use crate::roles::unexpected;
use async_trait::async_trait;
use ps_01_address_table::StagedObject;
use ps_02_lock_tracking::{flush_releases, LockService, LockSession, PendingRelease};
use ps_03_clock::{Clock, ClockTick, Cycle, CycleHook};
use shared_conversation::{ConnectionId, Conversation, Router};
use shared_types::{
    AddressError, AllocationId, MemoryRecord, NetworkAddress, PingTarget, Reference, Request,
    Response, SpaceError, TimeStamp, Transaction, TypeId, MPO, ROOT_ALLOCATION_ID,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// ROOT LINK
// =============================================================================

/// An owner's conversation with Root.
pub struct RootLink {
    conversation: Conversation,
    upstream: ConnectionId,
}

impl RootLink {
    /// Link over a fresh activity of `router`.
    pub fn new(router: &Router, upstream: ConnectionId) -> Self {
        Self {
            conversation: router.begin(),
            upstream,
        }
    }

    /// Send `request` towards Root and wait for the answer.
    pub async fn call(&mut self, request: Request) -> Result<Response, SpaceError> {
        self.conversation.request(self.upstream, request).await
    }
}

#[async_trait]
impl LockService for RootLink {
    async fn acquire_read(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        match self
            .call(Request::ReadLock {
                requester,
                target,
                cycle,
            })
            .await?
        {
            Response::LockGranted { .. } => Ok(()),
            other => Err(unexpected("LockGranted", &other)),
        }
    }

    async fn acquire_write(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
    ) -> Result<(), SpaceError> {
        match self
            .call(Request::WriteLock {
                requester,
                target,
                cycle,
            })
            .await?
        {
            Response::LockGranted { .. } => Ok(()),
            other => Err(unexpected("LockGranted", &other)),
        }
    }

    async fn release(
        &mut self,
        requester: MPO,
        target: MPO,
        cycle: TimeStamp,
        transaction: Transaction,
    ) -> Result<(), SpaceError> {
        match self
            .call(Request::ReleaseLock {
                requester,
                target,
                cycle,
                transaction,
            })
            .await?
        {
            Response::LockReleased => Ok(()),
            other => Err(unexpected("LockReleased", &other)),
        }
    }
}

// =============================================================================
// OWNER STATE
// =============================================================================

/// The part of an owner a program works with during a cycle.
pub struct OwnerState {
    mpo: MPO,
    root: Reference,
    heap: Arc<ProcessHeap>,
    locks: LockSession,
    link: RootLink,
    cycle: TimeStamp,
    pending: Vec<PendingRelease>,
}

impl CycleHook for OwnerState {
    fn cycle_begin(&mut self, tick: &ClockTick) {
        self.cycle = tick.cycle;
    }

    fn cycle_complete(&mut self, tick: &ClockTick) {
        let releases = self.locks.take_releases();
        if !releases.is_empty() {
            debug!(mpo = %self.mpo, cycle = tick.cycle, releases = releases.len(), "[ps-04] releases queued");
        }
        self.pending.extend(releases);
    }
}

impl OwnerState {
    /// This owner.
    pub fn mpo(&self) -> MPO {
        self.mpo
    }

    /// Heap reference of this owner's root object.
    pub fn root(&self) -> Reference {
        self.root
    }

    /// Current cycle.
    pub fn cycle(&self) -> TimeStamp {
        self.cycle
    }

    /// Heap of the hosting process.
    pub fn heap(&self) -> &Arc<ProcessHeap> {
        &self.heap
    }

    /// Locks held this cycle.
    pub fn locks(&self) -> &LockSession {
        &self.locks
    }

    /// Releases waiting to be sent.
    pub fn pending_releases(&self) -> usize {
        self.pending.len()
    }

    fn foreign_target(&self, address: &NetworkAddress) -> Result<Option<MPO>, AddressError> {
        if address.mpo == self.mpo {
            return Ok(None);
        }
        if address.mpo.mp() != self.heap.mp() {
            return Err(AddressError::NotAllocated(format!(
                "owner {} is not hosted in process {}",
                address.mpo,
                self.heap.mp()
            )));
        }
        Ok(Some(address.mpo))
    }

    // =========================================================================
    // MEMORY
    // =========================================================================

    /// Read an element. Elements of other owners of this process are read
    /// under a read lock.
    pub async fn read(&mut self, reference: &Reference) -> Result<Vec<u8>, SpaceError> {
        let address = self.heap.resolve(reference)?;
        if let Some(target) = self.foreign_target(&address)? {
            self.locks.read(&mut self.link, target, self.cycle).await?;
        }
        Ok(self.heap.read(reference)?)
    }

    /// Write an element.
    ///
    /// Own elements change immediately. Elements of other owners are
    /// written under a write lock and land when the target applies the
    /// committed transaction.
    pub async fn write(&mut self, reference: &Reference, data: Vec<u8>) -> Result<(), SpaceError> {
        let address = self.heap.resolve(reference)?;
        if address.mpo == self.mpo {
            return Ok(self.heap.write(reference, data)?);
        }
        self.locks
            .write(&mut self.link, address.mpo, self.cycle)
            .await?;
        self.locks.record(MemoryRecord { address, data })?;
        Ok(())
    }

    /// Allocate an object of `type_id` and place it in the heap.
    pub async fn allocate(&mut self, type_id: TypeId) -> Result<Reference, SpaceError> {
        let request = Request::AllocateNetworkAddress {
            mpo: self.mpo,
            type_id,
        };
        match self.link.call(request).await? {
            Response::Allocated { address } => Ok(self.heap.insert_object(address)?),
            other => Err(unexpected("Allocated", &other)),
        }
    }

    /// Free an object of this owner.
    pub async fn deallocate(&mut self, reference: &Reference) -> Result<(), SpaceError> {
        let address = self.heap.resolve(reference)?.object_address()?;
        if address.mpo != self.mpo {
            return Err(AddressError::NotAllocated(format!(
                "{} cannot free objects of {}",
                self.mpo, address.mpo
            ))
            .into());
        }
        match self
            .link
            .call(Request::DeallocateNetworkAddress { address })
            .await?
        {
            Response::Deallocated => {
                self.heap.remove_object(reference)?;
                Ok(())
            }
            other => Err(unexpected("Deallocated", &other)),
        }
    }

    /// Root object of `mpo`, in heap form when it lives in this process.
    pub async fn get_root(&mut self, mpo: MPO) -> Result<Reference, SpaceError> {
        if mpo == self.mpo {
            return Ok(self.root);
        }
        match self.link.call(Request::GetRoot { mpo }).await? {
            Response::Root { root } => Ok(self
                .heap
                .local_reference(root)
                .unwrap_or(Reference::Network(root))),
            other => Err(unexpected("Root", &other)),
        }
    }

    /// Link one of this owner's objects to `to`.
    pub fn add_link(&self, from: &Reference, to: Reference) -> Result<(), SpaceError> {
        let source = self.heap.resolve(from)?;
        if source.mpo != self.mpo {
            return Err(AddressError::NotAllocated(format!(
                "{} cannot link objects of {}",
                self.mpo, source.mpo
            ))
            .into());
        }
        Ok(self.heap.add_link(from, to)?)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Save everything reachable from this owner's root under `path`.
    pub async fn save_snapshot(&mut self, path: &str) -> Result<(), SpaceError> {
        let image = self.heap.save_owner(self.mpo, self.cycle)?;
        let bytes = image.len();
        match self
            .link
            .call(Request::SaveSnapshot {
                path: path.to_string(),
                image,
            })
            .await?
        {
            Response::SnapshotSaved => {
                info!(mpo = %self.mpo, path, bytes, "[ps-04] snapshot saved");
                Ok(())
            }
            other => Err(unexpected("SnapshotSaved", &other)),
        }
    }

    /// Replace this owner's objects with the snapshot at `path`.
    ///
    /// Objects of the saved owner get fresh allocations here; links to
    /// them follow. Heap references taken before the load are stale
    /// afterwards, the root included. Returns the number of objects
    /// installed.
    ///
    /// The previous objects are freed at Root only once the new graph is
    /// installed. If an allocation or the install fails, the allocations
    /// made so far are freed and the owner keeps its previous objects.
    pub async fn load_snapshot(&mut self, path: &str) -> Result<usize, SpaceError> {
        let image = match self
            .link
            .call(Request::LoadSnapshot {
                path: path.to_string(),
            })
            .await?
        {
            Response::SnapshotLoaded { image } => image,
            other => return Err(unexpected("SnapshotLoaded", &other)),
        };

        let mut staged = ProcessHeap::stage(&image)?;
        let source = staged
            .objects
            .first()
            .map(|object| object.address.as_network())
            .transpose()?
            .map(|address| address.mpo)
            .ok_or_else(|| AddressError::NotAllocated(format!("empty snapshot at '{path}'")))?;

        let previous: Vec<NetworkAddress> = self
            .heap
            .objects(self.mpo)
            .into_iter()
            .filter(|address| address.allocation_id != ROOT_ALLOCATION_ID)
            .collect();

        let mut fresh = Vec::new();
        let relocation = match self.place_objects(&staged.objects, source, &mut fresh).await {
            Ok(relocation) => relocation,
            Err(err) => {
                self.free_at_root(fresh).await;
                return Err(err);
            }
        };

        for object in &mut staged.objects {
            relocate_object(object, &relocation);
        }
        let installed = relocation.len();
        if let Err(err) = self.heap.install_owner(self.mpo, staged) {
            self.free_at_root(fresh).await;
            return Err(err);
        }
        self.root = self
            .heap
            .local_reference(NetworkAddress::make_root(self.mpo))
            .ok_or_else(|| AddressError::NotAllocated(format!("root of {}", self.mpo)))?;
        self.free_at_root(previous).await;

        info!(mpo = %self.mpo, %source, path, installed, "[ps-04] snapshot loaded");
        Ok(installed)
    }

    /// Allocate a home for every object of `source`. Allocations are pushed
    /// to `fresh` as they are granted.
    async fn place_objects(
        &mut self,
        objects: &[StagedObject],
        source: MPO,
        fresh: &mut Vec<NetworkAddress>,
    ) -> Result<Relocation, SpaceError> {
        let mut relocation = Relocation::new();
        for object in objects {
            let address = object.address.as_network()?;
            if address.mpo != source {
                continue;
            }
            let placed = if address.allocation_id == ROOT_ALLOCATION_ID {
                NetworkAddress::make_root(self.mpo)
            } else {
                let request = Request::AllocateNetworkAddress {
                    mpo: self.mpo,
                    type_id: address.type_instance.type_id,
                };
                let placed = match self.link.call(request).await? {
                    Response::Allocated { address } => address,
                    other => return Err(unexpected("Allocated", &other)),
                };
                fresh.push(placed);
                placed
            };
            relocation.insert((address.mpo, address.allocation_id), placed);
        }
        Ok(relocation)
    }

    async fn free_at_root(&mut self, addresses: Vec<NetworkAddress>) {
        for address in addresses {
            if let Err(error) = self
                .link
                .call(Request::DeallocateNetworkAddress { address })
                .await
            {
                warn!(mpo = %self.mpo, ?address, %error, "[ps-04] could not free object at root");
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// True when `mpo` is constructed.
    pub async fn ping_owner(&mut self, mpo: MPO) -> Result<bool, SpaceError> {
        match self
            .link
            .call(Request::Ping {
                target: PingTarget::Owner(mpo),
            })
            .await?
        {
            Response::OwnerStatus { alive, .. } => Ok(alive),
            other => Err(unexpected("OwnerStatus", &other)),
        }
    }

    /// Send any request towards Root on this owner's activity.
    pub async fn call(&mut self, request: Request) -> Result<Response, SpaceError> {
        self.link.call(request).await
    }

    // =========================================================================
    // CYCLE PLUMBING
    // =========================================================================

    async fn flush(&mut self) -> Result<usize, SpaceError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let releases = std::mem::take(&mut self.pending);
        flush_releases(&mut self.link, self.mpo, releases).await
    }

    async fn take_transactions(&mut self) -> Result<usize, SpaceError> {
        let transactions = match self
            .link
            .call(Request::TakeTransactions { mpo: self.mpo })
            .await?
        {
            Response::Transactions { transactions } => transactions,
            other => return Err(unexpected("Transactions", &other)),
        };
        let applied: usize = transactions
            .iter()
            .map(|transaction| self.heap.apply(transaction))
            .sum();
        if !transactions.is_empty() {
            debug!(mpo = %self.mpo, transactions = transactions.len(), applied, "[ps-04] transactions applied");
        }
        Ok(applied)
    }
}

type Relocation = HashMap<(MPO, AllocationId), NetworkAddress>;

fn relocate(reference: &Reference, relocation: &Relocation) -> Reference {
    match reference {
        Reference::Network(address) => relocation
            .get(&(address.mpo, address.allocation_id))
            .map(|placed| {
                Reference::Network(NetworkAddress {
                    type_instance: address.type_instance,
                    ..*placed
                })
            })
            .unwrap_or(*reference),
        Reference::Heap(_) => *reference,
    }
}

fn relocate_object(object: &mut StagedObject, relocation: &Relocation) {
    object.address = relocate(&object.address, relocation);
    for link in &mut object.links {
        *link = relocate(link, relocation);
    }
}

// =============================================================================
// OWNER CONTEXT
// =============================================================================

/// A constructed owner and its cycle clock.
pub struct OwnerContext {
    clock: Clock,
    state: OwnerState,
}

impl OwnerContext {
    /// Construct a new owner in the process of `heap`.
    pub async fn construct(
        router: &Router,
        upstream: ConnectionId,
        heap: Arc<ProcessHeap>,
    ) -> Result<Self, SpaceError> {
        let mut link = RootLink::new(router, upstream);
        let (mpo, root) = match link.call(Request::ConstructOwner { mp: heap.mp() }).await? {
            Response::OwnerConstructed { mpo, root } => (mpo, root),
            other => return Err(unexpected("OwnerConstructed", &other)),
        };
        let root_reference = heap.host(mpo)?;
        info!(%mpo, root = ?root, "[ps-04] owner context ready");

        Ok(Self {
            clock: Clock::new(),
            state: OwnerState {
                mpo,
                root: root_reference,
                heap,
                locks: LockSession::new(mpo),
                link,
                cycle: 0,
                pending: Vec::new(),
            },
        })
    }

    /// This owner.
    pub fn mpo(&self) -> MPO {
        self.state.mpo
    }

    /// Cycle the next `begin_cycle` opens.
    pub fn cycle(&self) -> TimeStamp {
        self.clock.cycle()
    }

    /// Owner state outside a cycle, for inspection.
    pub fn state(&self) -> &OwnerState {
        &self.state
    }

    /// Open the next cycle.
    ///
    /// Releases queued by the previous cycle are sent first, then the
    /// transactions other owners committed against this one are applied.
    pub async fn begin_cycle(&mut self) -> Result<Cycle<'_, OwnerState>, SpaceError> {
        self.state.flush().await?;
        self.state.take_transactions().await?;
        Ok(Cycle::begin(&mut self.clock, &mut self.state))
    }

    /// Send every queued release.
    pub async fn finish(&mut self) -> Result<usize, SpaceError> {
        self.state.flush().await
    }

    /// Release everything, destroy the owner at Root and evict it from the
    /// heap.
    pub async fn destroy(mut self) -> Result<(), SpaceError> {
        let mpo = self.state.mpo;
        if let Err(error) = self.finish().await {
            warn!(%mpo, %error, "[ps-04] releases failed during destroy");
        }
        let destroyed = match self.state.link.call(Request::DestroyOwner { mpo }).await {
            Ok(Response::OwnerDestroyed) => Ok(()),
            Ok(other) => Err(unexpected("OwnerDestroyed", &other)),
            Err(error) => Err(error),
        };
        self.state.heap.evict(mpo);
        info!(%mpo, "[ps-04] owner destroyed");
        destroyed
    }
}
