//! # Process Heap
//!
//! Objects of every owner hosted by one executor process.
//!
//! ```text
//!                    ┌──────────── ProcessHeap (one per MP) ────────────┐
//!  Reference::Heap ──┤ HeapRegistry: (owner, ptr) ──► NetworkAddress    │
//!                    │ owners: MPO ──► allocation ──► HeapObject        │
//!  Reference::Net ───┤              (elements by TypeInstance, links)   │
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! Objects hosted here are handed out in heap form. Links to hosted objects
//! are stored in heap form as well, so a saved graph names each object
//! once; `Snapshot::to_network` rewrites them before the image leaves the
//! process.

use parking_lot::RwLock;
use ps_01_address_table::{
    decode_snapshot, encode_snapshot, load_graph, save_graph, HeapRegistry, ObjectImage,
    ObjectSink, ObjectSource, StagedGraph, StagedObject,
};
use shared_types::{
    AddressError, AllocationId, HeapPtr, NetworkAddress, Reference, SnapshotError, SpaceError,
    TimeStamp, Transaction, TypeInstance, MP, MPO, ROOT_ALLOCATION_ID,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const FIRST_HEAP_PTR: u64 = 0x1000;
const HEAP_PTR_STRIDE: u64 = 0x10;

/// Pointers are unique across every heap in the address space, so a heap
/// reference minted by another process never resolves here.
static NEXT_HEAP_PTR: AtomicU64 = AtomicU64::new(FIRST_HEAP_PTR);

#[derive(Debug, Clone)]
struct HeapObject {
    address: NetworkAddress,
    ptr: HeapPtr,
    elements: BTreeMap<TypeInstance, Vec<u8>>,
    links: Vec<Reference>,
}

impl HeapObject {
    fn heap_reference(&self, type_instance: TypeInstance) -> Reference {
        Reference::heap(type_instance, self.address.mpo.owner, self.ptr)
    }

    fn check_element(&self, element: &NetworkAddress) -> Result<(), AddressError> {
        if TypeInstance::make_object(element.type_instance.type_id)? != self.address.type_instance
        {
            return Err(AddressError::NotAllocated(format!(
                "element {} in object {}:{}",
                element.type_instance, self.address.mpo, self.address.allocation_id
            )));
        }
        Ok(())
    }
}

type OwnerHeap = BTreeMap<AllocationId, HeapObject>;

/// Heap shared by the owners of one process.
pub struct ProcessHeap {
    mp: MP,
    owners: RwLock<BTreeMap<MPO, OwnerHeap>>,
    registry: HeapRegistry,
}

impl ProcessHeap {
    /// Empty heap for process `mp`.
    pub fn new(mp: MP) -> Self {
        Self {
            mp,
            owners: RwLock::new(BTreeMap::new()),
            registry: HeapRegistry::new(),
        }
    }

    /// Process this heap belongs to.
    pub fn mp(&self) -> MP {
        self.mp
    }

    /// Pointer registry used to translate heap references.
    pub fn registry(&self) -> &HeapRegistry {
        &self.registry
    }

    fn fresh_ptr(&self) -> HeapPtr {
        HeapPtr(NEXT_HEAP_PTR.fetch_add(HEAP_PTR_STRIDE, Ordering::Relaxed))
    }

    // =========================================================================
    // OWNERS
    // =========================================================================

    /// Start hosting `mpo`. Its root object is created on first use.
    pub fn host(&self, mpo: MPO) -> Result<Reference, AddressError> {
        if mpo.mp() != self.mp {
            return Err(AddressError::NotAllocated(format!(
                "owner {mpo} in process {}",
                self.mp
            )));
        }
        self.owners.write().entry(mpo).or_default();
        self.insert_object(NetworkAddress::make_root(mpo))
    }

    /// Stop hosting `mpo`. Returns the number of objects dropped.
    ///
    /// Links held by the remaining owners into `mpo` are rewritten to
    /// network form, since its pointers stop resolving.
    pub fn evict(&self, mpo: MPO) -> usize {
        let mut owners = self.owners.write();
        let dropped = owners.remove(&mpo).map_or(0, |objects| objects.len());

        let mut rewritten = 0usize;
        for heap in owners.values_mut() {
            for object in heap.values_mut() {
                for link in &mut object.links {
                    let Reference::Heap(target) = link else {
                        continue;
                    };
                    if target.owner != mpo.owner {
                        continue;
                    }
                    if let Ok(address) = link.network_address(&self.registry) {
                        *link = Reference::Network(address);
                        rewritten += 1;
                    }
                }
            }
        }

        self.registry.clear_owner(mpo.owner);
        debug!(%mpo, dropped, rewritten, "[ps-04] owner evicted from heap");
        dropped
    }

    /// True when `mpo` lives in this heap.
    pub fn is_hosted(&self, mpo: MPO) -> bool {
        self.owners.read().contains_key(&mpo)
    }

    /// Hosted owners, ascending.
    pub fn hosted(&self) -> Vec<MPO> {
        self.owners.read().keys().copied().collect()
    }

    /// Objects of `mpo`, root included.
    pub fn object_count(&self, mpo: MPO) -> usize {
        self.owners.read().get(&mpo).map_or(0, BTreeMap::len)
    }

    /// Network addresses of the objects of `mpo`, by allocation id.
    pub fn objects(&self, mpo: MPO) -> Vec<NetworkAddress> {
        self.owners
            .read()
            .get(&mpo)
            .map(|heap| heap.values().map(|object| object.address).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    /// Place the object at `address` and return its heap reference.
    pub fn insert_object(&self, address: NetworkAddress) -> Result<Reference, AddressError> {
        let object = address.object_address()?;
        let mut owners = self.owners.write();
        let heap = owners
            .get_mut(&object.mpo)
            .ok_or_else(|| AddressError::NotAllocated(format!("owner {}", object.mpo)))?;

        if let Some(existing) = heap.get(&object.allocation_id) {
            return Ok(existing.heap_reference(object.type_instance));
        }

        let ptr = self.fresh_ptr();
        self.registry.register(object.mpo.owner, ptr, object);
        let placed = HeapObject {
            address: object,
            ptr,
            elements: BTreeMap::new(),
            links: Vec::new(),
        };
        let reference = placed.heap_reference(object.type_instance);
        heap.insert(object.allocation_id, placed);
        Ok(reference)
    }

    /// Drop an object and every link to it. Returns its network address.
    pub fn remove_object(&self, reference: &Reference) -> Result<NetworkAddress, AddressError> {
        let object = self.resolve(reference)?.object_address()?;
        let mut owners = self.owners.write();
        let removed = owners
            .get_mut(&object.mpo)
            .and_then(|heap| heap.remove(&object.allocation_id))
            .ok_or_else(|| {
                AddressError::NotAllocated(format!("object {}:{}", object.mpo, object.allocation_id))
            })?;
        self.registry.unregister(object.mpo.owner, removed.ptr);

        for heap in owners.values_mut() {
            for other in heap.values_mut() {
                other.links.retain(|link| !points_at(link, &removed));
            }
        }
        Ok(object)
    }

    /// Network form of `reference`.
    pub fn resolve(&self, reference: &Reference) -> Result<NetworkAddress, AddressError> {
        reference.network_address(&self.registry)
    }

    /// Heap form of `address` when its object is hosted here.
    pub fn local_reference(&self, address: NetworkAddress) -> Option<Reference> {
        let owners = self.owners.read();
        local_form(&owners, address)
    }

    /// Value of the element at `reference`. Unwritten elements read empty.
    pub fn read(&self, reference: &Reference) -> Result<Vec<u8>, AddressError> {
        let element = self.resolve(reference)?;
        let owners = self.owners.read();
        let object = find(&owners, &element)?;
        object.check_element(&element)?;
        Ok(object
            .elements
            .get(&element.type_instance)
            .cloned()
            .unwrap_or_default())
    }

    /// Store `data` in the element at `reference`.
    pub fn write(&self, reference: &Reference, data: Vec<u8>) -> Result<(), AddressError> {
        let element = self.resolve(reference)?;
        let mut owners = self.owners.write();
        let object = find_mut(&mut owners, &element)?;
        object.check_element(&element)?;
        object.elements.insert(element.type_instance, data);
        Ok(())
    }

    /// Add a link from the object of `from` to `to`.
    pub fn add_link(&self, from: &Reference, to: Reference) -> Result<(), AddressError> {
        let source = self.resolve(from)?;
        let target = match to {
            Reference::Network(address) => {
                address.object_address()?;
                self.local_reference(address).unwrap_or(to)
            }
            Reference::Heap(_) => {
                self.resolve(&to)?;
                to
            }
        };
        let mut owners = self.owners.write();
        let object = find_mut(&mut owners, &source)?;
        if !object.links.contains(&target) {
            object.links.push(target);
        }
        Ok(())
    }

    /// Links of the object of `from`.
    pub fn links(&self, from: &Reference) -> Result<Vec<Reference>, AddressError> {
        let source = self.resolve(from)?;
        let owners = self.owners.read();
        Ok(find(&owners, &source)?.links.clone())
    }

    /// Apply committed writes. Records for objects no longer hosted are
    /// skipped. Returns the number applied.
    pub fn apply(&self, transaction: &Transaction) -> usize {
        let mut owners = self.owners.write();
        let mut applied = 0;
        for record in &transaction.records {
            let placed = find_mut(&mut owners, &record.address)
                .and_then(|object| object.check_element(&record.address).map(|()| object));
            match placed {
                Ok(object) => {
                    object
                        .elements
                        .insert(record.address.type_instance, record.data.clone());
                    applied += 1;
                }
                Err(error) => {
                    warn!(source = %transaction.source, cycle = transaction.cycle, %error, "[ps-04] skipping transaction record");
                }
            }
        }
        applied
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Object graph view of one owner.
    pub fn image(&self, mpo: MPO) -> OwnerImage<'_> {
        OwnerImage { heap: self, mpo }
    }

    /// Encode everything reachable from the root of `mpo`.
    pub fn save_owner(&self, mpo: MPO, timestamp: TimeStamp) -> Result<Vec<u8>, SpaceError> {
        let root = self
            .local_reference(NetworkAddress::make_root(mpo))
            .ok_or_else(|| AddressError::NotAllocated(format!("owner {mpo}")))?;
        let mut snapshot = save_graph(&self.image(mpo), &[root], timestamp)?;
        snapshot.to_network(&self.registry)?;
        Ok(encode_snapshot(&snapshot)?)
    }

    /// Decode an encoded snapshot without touching live state.
    pub fn stage(image: &[u8]) -> Result<StagedGraph, SnapshotError> {
        let snapshot = decode_snapshot(image)?;
        load_graph(&snapshot)
    }

    /// Replace the objects of `mpo` with a staged graph.
    pub fn install_owner(&self, mpo: MPO, staged: StagedGraph) -> Result<(), SpaceError> {
        staged.apply(&mut self.image(mpo))
    }

    fn replace_owner(
        &self,
        mpo: MPO,
        objects: Vec<(NetworkAddress, BTreeMap<TypeInstance, Vec<u8>>, Vec<Reference>)>,
    ) {
        let mut owners = self.owners.write();
        if let Some(previous) = owners.remove(&mpo) {
            for object in previous.values() {
                self.registry.unregister(mpo.owner, object.ptr);
            }
        }

        let mut heap = OwnerHeap::new();
        for (address, elements, links) in objects {
            let ptr = self.fresh_ptr();
            self.registry.register(mpo.owner, ptr, address);
            heap.insert(
                address.allocation_id,
                HeapObject {
                    address,
                    ptr,
                    elements,
                    links,
                },
            );
        }
        owners.insert(mpo, heap);

        let normalized: Vec<(AllocationId, Vec<Reference>)> = owners[&mpo]
            .iter()
            .map(|(&allocation, object)| {
                let links = object
                    .links
                    .iter()
                    .map(|link| match link {
                        Reference::Network(address) => local_form(&owners, *address).unwrap_or(*link),
                        Reference::Heap(_) => *link,
                    })
                    .collect();
                (allocation, links)
            })
            .collect();
        if let Some(heap) = owners.get_mut(&mpo) {
            for (allocation, links) in normalized {
                if let Some(object) = heap.get_mut(&allocation) {
                    object.links = links;
                }
            }
        }
    }
}

fn find<'a>(
    owners: &'a BTreeMap<MPO, OwnerHeap>,
    element: &NetworkAddress,
) -> Result<&'a HeapObject, AddressError> {
    owners
        .get(&element.mpo)
        .and_then(|heap| heap.get(&element.allocation_id))
        .ok_or_else(|| {
            AddressError::NotAllocated(format!("object {}:{}", element.mpo, element.allocation_id))
        })
}

fn find_mut<'a>(
    owners: &'a mut BTreeMap<MPO, OwnerHeap>,
    element: &NetworkAddress,
) -> Result<&'a mut HeapObject, AddressError> {
    owners
        .get_mut(&element.mpo)
        .and_then(|heap| heap.get_mut(&element.allocation_id))
        .ok_or_else(|| {
            AddressError::NotAllocated(format!("object {}:{}", element.mpo, element.allocation_id))
        })
}

fn local_form(owners: &BTreeMap<MPO, OwnerHeap>, address: NetworkAddress) -> Option<Reference> {
    find(owners, &address)
        .ok()
        .map(|object| object.heap_reference(address.type_instance))
}

fn points_at(link: &Reference, object: &HeapObject) -> bool {
    match link {
        Reference::Heap(heap) => heap.owner == object.address.mpo.owner && heap.heap == object.ptr,
        Reference::Network(address) => {
            address.mpo == object.address.mpo && address.allocation_id == object.address.allocation_id
        }
    }
}

// =============================================================================
// OWNER IMAGE
// =============================================================================

/// Graph view of one owner's objects.
///
/// Objects of other owners are presented as empty stubs, so a saved graph
/// stops at the owner boundary and installing skips them.
pub struct OwnerImage<'a> {
    heap: &'a ProcessHeap,
    mpo: MPO,
}

impl ObjectSource for OwnerImage<'_> {
    fn read_object(&self, object: &Reference) -> Result<ObjectImage, SpaceError> {
        let address = self.heap.resolve(object)?;
        if address.mpo != self.mpo {
            return Ok(ObjectImage {
                data: Vec::new(),
                links: Vec::new(),
            });
        }

        let owners = self.heap.owners.read();
        let placed = find(&owners, &address)?;
        let elements: Vec<(&TypeInstance, &Vec<u8>)> = placed.elements.iter().collect();
        let data =
            bincode::serialize(&elements).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        Ok(ObjectImage {
            data,
            links: placed.links.clone(),
        })
    }
}

impl ObjectSink for OwnerImage<'_> {
    fn install(&mut self, objects: Vec<StagedObject>) -> Result<(), SpaceError> {
        let mut staged = Vec::with_capacity(objects.len());
        let mut skipped = 0usize;
        for object in objects {
            let address = object.address.as_network()?;
            if address.mpo != self.mpo {
                skipped += 1;
                continue;
            }
            let elements: Vec<(TypeInstance, Vec<u8>)> = bincode::deserialize(&object.data)
                .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
            staged.push((address, elements.into_iter().collect(), object.links));
        }

        if !staged
            .iter()
            .any(|(address, _, _)| address.allocation_id == ROOT_ALLOCATION_ID)
        {
            return Err(SnapshotError::Corrupt(format!("no root object for owner {}", self.mpo)).into());
        }

        let installed = staged.len();
        self.heap.replace_owner(self.mpo, staged);
        debug!(mpo = %self.mpo, installed, skipped, "[ps-04] owner heap installed");
        Ok(())
    }
}
