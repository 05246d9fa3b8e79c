//! # Reference
//!
//! A tagged address that is either a location-independent
//! [`NetworkAddress`] or a process-local [`HeapAddress`].
//!
//! ## Rules
//!
//! - Network addresses may be serialized and sent anywhere in the cluster.
//! - Heap addresses are only meaningful in the process that produced them.
//!   `Reference` refuses to serialize one, and message payloads carry
//!   `NetworkAddress` directly so the type system keeps pointers local.
//! - `Reference::default()` is invalid. Every accessor that dereferences an
//!   address fails with [`AddressError::InvalidReference`] instead of
//!   returning garbage.

use crate::errors::AddressError;
use crate::identity::{Instance, TypeId, TypeInstance};
use crate::mpo::{OwnerId, MPO};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Per-owner allocation identifier of a network object.
pub type AllocationId = u16;

/// Allocation id of every owner's root object.
pub const ROOT_ALLOCATION_ID: AllocationId = 0;

/// Raw process-local pointer value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapPtr(pub u64);

impl fmt::Debug for HeapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapPtr({:#x})", self.0)
    }
}

impl fmt::Display for HeapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// =============================================================================
// NETWORK ADDRESS
// =============================================================================

/// Cluster-wide address of an element of a network object.
///
/// Field order drives ordering: owner coordinate first, then allocation,
/// then type instance.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NetworkAddress {
    /// Owning partition.
    pub mpo: MPO,
    /// Allocation within the owner.
    pub allocation_id: AllocationId,
    /// Element within the object.
    pub type_instance: TypeInstance,
}

impl NetworkAddress {
    /// Create a network address.
    pub const fn new(mpo: MPO, allocation_id: AllocationId, type_instance: TypeInstance) -> Self {
        Self {
            mpo,
            allocation_id,
            type_instance,
        }
    }

    /// Root object of `mpo`.
    pub const fn make_root(mpo: MPO) -> Self {
        Self::new(mpo, ROOT_ALLOCATION_ID, TypeInstance::make_root())
    }

    /// Valid when its type is valid.
    pub const fn is_valid(&self) -> bool {
        self.type_instance.is_valid()
    }

    /// Address of the owning object.
    pub fn object_address(&self) -> Result<Self, AddressError> {
        if !self.is_valid() {
            return Err(AddressError::InvalidReference);
        }
        Ok(Self::new(
            self.mpo,
            self.allocation_id,
            TypeInstance::make_object(self.type_instance.type_id)?,
        ))
    }
}

impl From<NetworkAddress> for Reference {
    fn from(address: NetworkAddress) -> Self {
        Reference::Network(address)
    }
}

// =============================================================================
// HEAP ADDRESS
// =============================================================================

/// Process-local address. Deliberately not `Serialize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapAddress {
    /// Owner slot the heap belongs to.
    pub owner: OwnerId,
    /// Base pointer of the object.
    pub heap: HeapPtr,
    /// Element within the object.
    pub type_instance: TypeInstance,
}

/// Process-local reverse table from heap pointers to network addresses.
///
/// Owned by the allocator; only the process that allocated a pointer can
/// resolve it.
pub trait HeapResolver {
    /// Network address of the object allocated at `heap` for `owner`.
    fn resolve(&self, owner: OwnerId, heap: HeapPtr) -> Option<NetworkAddress>;
}

// =============================================================================
// REFERENCE
// =============================================================================

/// Either a network or a heap address. Exactly one variant holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// Location-independent address.
    Network(NetworkAddress),
    /// Process-local address.
    Heap(HeapAddress),
}

impl Default for Reference {
    fn default() -> Self {
        Reference::Network(NetworkAddress::default())
    }
}

impl Reference {
    /// Network reference from `(type instance, mpo, allocation)`.
    pub const fn network(
        type_instance: TypeInstance,
        mpo: MPO,
        allocation_id: AllocationId,
    ) -> Self {
        Reference::Network(NetworkAddress::new(mpo, allocation_id, type_instance))
    }

    /// Heap reference from `(type instance, owner, pointer)`.
    pub const fn heap(type_instance: TypeInstance, owner: OwnerId, heap: HeapPtr) -> Self {
        Reference::Heap(HeapAddress {
            owner,
            heap,
            type_instance,
        })
    }

    /// Root object of `mpo`.
    pub const fn make_root(mpo: MPO) -> Self {
        Reference::Network(NetworkAddress::make_root(mpo))
    }

    /// True for the network variant.
    pub const fn is_network_address(&self) -> bool {
        matches!(self, Reference::Network(_))
    }

    /// True for the heap variant.
    pub const fn is_heap_address(&self) -> bool {
        matches!(self, Reference::Heap(_))
    }

    /// Element identity.
    pub const fn type_instance(&self) -> TypeInstance {
        match self {
            Reference::Network(net) => net.type_instance,
            Reference::Heap(heap) => heap.type_instance,
        }
    }

    /// Type of the addressed element.
    pub const fn type_id(&self) -> TypeId {
        self.type_instance().type_id
    }

    /// Instance of the addressed element.
    pub const fn instance(&self) -> Instance {
        self.type_instance().instance
    }

    /// Owner slot (both variants carry one).
    pub const fn owner_id(&self) -> OwnerId {
        match self {
            Reference::Network(net) => net.mpo.owner,
            Reference::Heap(heap) => heap.owner,
        }
    }

    /// Valid when the type instance is valid.
    pub const fn is_valid(&self) -> bool {
        self.type_instance().is_valid()
    }

    fn ensure_valid(&self) -> Result<(), AddressError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AddressError::InvalidReference)
        }
    }

    /// Owner coordinate of a network reference.
    pub fn mpo(&self) -> Result<MPO, AddressError> {
        Ok(self.as_network()?.mpo)
    }

    /// Allocation id of a network reference.
    pub fn allocation_id(&self) -> Result<AllocationId, AddressError> {
        Ok(self.as_network()?.allocation_id)
    }

    /// Pointer of a heap reference.
    pub fn heap_ptr(&self) -> Result<HeapPtr, AddressError> {
        self.ensure_valid()?;
        match self {
            Reference::Heap(heap) => Ok(heap.heap),
            Reference::Network(_) => Err(AddressError::WrongVariant {
                expected: "heap",
                found: "network",
            }),
        }
    }

    /// The network variant without translation.
    pub fn as_network(&self) -> Result<NetworkAddress, AddressError> {
        self.ensure_valid()?;
        match self {
            Reference::Network(net) => Ok(*net),
            Reference::Heap(_) => Err(AddressError::WrongVariant {
                expected: "network",
                found: "heap",
            }),
        }
    }

    /// Same address, different element.
    pub fn with_type_instance(&self, type_instance: TypeInstance) -> Self {
        match *self {
            Reference::Network(net) => {
                Reference::Network(NetworkAddress { type_instance, ..net })
            }
            Reference::Heap(heap) => Reference::Heap(HeapAddress { type_instance, ..heap }),
        }
    }

    /// Reference of the owning object: object type, instance zero.
    pub fn object_address(&self) -> Result<Self, AddressError> {
        self.ensure_valid()?;
        Ok(self.with_type_instance(TypeInstance::make_object(self.type_id())?))
    }

    /// Translate to a network address.
    ///
    /// A heap pointer the resolver does not know did not come from this
    /// process; that is reported as [`AddressError::ForeignHeap`], which is
    /// fatal to the caller.
    pub fn network_address(
        &self,
        resolver: &dyn HeapResolver,
    ) -> Result<NetworkAddress, AddressError> {
        self.ensure_valid()?;
        match self {
            Reference::Network(net) => Ok(*net),
            Reference::Heap(heap) => {
                let object = resolver.resolve(heap.owner, heap.heap).ok_or(
                    AddressError::ForeignHeap {
                        owner: heap.owner,
                        heap: heap.heap.0,
                    },
                )?;
                tracing::trace!(owner = heap.owner, heap = %heap.heap, "resolved heap address");
                Ok(NetworkAddress {
                    type_instance: heap.type_instance,
                    ..object
                })
            }
        }
    }
}

// Only the network variant has a wire form.
impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reference::Network(net) => net.serialize(serializer),
            Reference::Heap(heap) => Err(serde::ser::Error::custom(format!(
                "heap address {} of owner {} cannot leave its process",
                heap.heap, heap.owner
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        NetworkAddress::deserialize(deserializer).map(Reference::Network)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Network(net) => write!(
                f,
                "net:{}:{}:{}",
                net.mpo, net.allocation_id, net.type_instance
            ),
            Reference::Heap(heap) => write!(
                f,
                "heap:{}:{}:{}",
                heap.owner, heap.heap, heap.type_instance
            ),
        }
    }
}

impl FromStr for Reference {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::Malformed(format!("reference '{s}'"));
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }
        let type_instance: TypeInstance = parts[3].parse()?;
        match parts[0] {
            "net" => {
                let allocation_id = parts[2].parse().map_err(|_| malformed())?;
                Ok(Reference::network(type_instance, parts[1].parse()?, allocation_id))
            }
            "heap" => {
                let owner = parts[1].parse().map_err(|_| malformed())?;
                let digits = parts[2].trim_start_matches("0x");
                let ptr = u64::from_str_radix(digits, 16).map_err(|_| malformed())?;
                Ok(Reference::heap(type_instance, owner, HeapPtr(ptr)))
            }
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ROOT_TYPE_ID;

    struct OneObject(OwnerId, HeapPtr, NetworkAddress);

    impl HeapResolver for OneObject {
        fn resolve(&self, owner: OwnerId, heap: HeapPtr) -> Option<NetworkAddress> {
            (owner == self.0 && heap == self.1).then_some(self.2)
        }
    }

    fn member(object: u8, sub: u8, instance: Instance) -> TypeInstance {
        TypeInstance::new(TypeId::make_context(object, sub), instance)
    }

    #[test]
    fn test_default_reference_is_invalid_network() {
        let r = Reference::default();
        assert!(r.is_network_address());
        assert!(!r.is_heap_address());
        assert!(!r.is_valid());
        assert!(matches!(r.mpo(), Err(AddressError::InvalidReference)));
        assert!(matches!(
            r.object_address(),
            Err(AddressError::InvalidReference)
        ));
    }

    #[test]
    fn test_heap_reference_scenario() {
        let ti = TypeInstance::new(TypeId::from_raw(456), 123);
        let r = Reference::heap(ti, 255, HeapPtr(0xFFFF_FFFF));
        assert!(r.is_heap_address());
        assert!(!r.is_network_address());
        assert_eq!(r.type_id(), TypeId::from_raw(456));
        assert_eq!(r.instance(), 123);
        assert_eq!(r.owner_id(), 255);
        assert_eq!(r.heap_ptr().unwrap(), HeapPtr(0xFFFF_FFFF));
    }

    #[test]
    fn test_network_reference_accessors() {
        let mpo = MPO::new(1, 2, 3);
        let r = Reference::network(member(2, 4, 0), mpo, 4);
        assert!(r.is_network_address());
        assert_eq!(r.mpo().unwrap(), mpo);
        assert_eq!(r.allocation_id().unwrap(), 4);
        assert_eq!(r.owner_id(), 3);
        assert!(matches!(
            r.heap_ptr(),
            Err(AddressError::WrongVariant { expected: "heap", .. })
        ));
    }

    #[test]
    fn test_object_address_masks_member_and_instance() {
        let r = Reference::network(member(2, 4, 9), MPO::new(1, 2, 3), 4);
        let object = r.object_address().unwrap();
        assert_eq!(object.type_id(), TypeId::make_context(2, 0));
        assert_eq!(object.instance(), 0);
        assert_eq!(object.allocation_id().unwrap(), 4);
    }

    #[test]
    fn test_object_address_of_symbol_type_fails() {
        let ti = TypeInstance::new(TypeId::make_symbol(-5).unwrap(), 0);
        let r = Reference::network(ti, MPO::new(0, 0, 0), 1);
        assert!(matches!(r.object_address(), Err(AddressError::SymbolType(-5))));
    }

    #[test]
    fn test_network_address_translation() {
        let object = NetworkAddress::new(MPO::new(0, 1, 2), 7, member(3, 0, 0));
        let resolver = OneObject(2, HeapPtr(0x1000), object);

        let heap_member = Reference::heap(member(3, 5, 1), 2, HeapPtr(0x1000));
        let net = heap_member.network_address(&resolver).unwrap();
        assert_eq!(net.mpo, object.mpo);
        assert_eq!(net.allocation_id, 7);
        assert_eq!(net.type_instance, member(3, 5, 1));

        let foreign = Reference::heap(member(3, 5, 1), 2, HeapPtr(0x2000));
        assert!(matches!(
            foreign.network_address(&resolver),
            Err(AddressError::ForeignHeap { owner: 2, heap: 0x2000 })
        ));

        let already = Reference::from(object);
        assert_eq!(already.network_address(&resolver).unwrap(), object);
    }

    #[test]
    fn test_heap_reference_refuses_serialization() {
        let r = Reference::heap(member(1, 0, 0), 0, HeapPtr(0xdead));
        assert!(bincode::serialize(&r).is_err());
        assert!(serde_json::to_string(&r).is_err());

        let net = Reference::make_root(MPO::new(1, 1, 1));
        let bytes = bincode::serialize(&net).unwrap();
        let back: Reference = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, net);
    }

    #[test]
    fn test_make_root() {
        let r = Reference::make_root(MPO::new(0, 0, 1));
        assert_eq!(r.type_id(), ROOT_TYPE_ID);
        assert_eq!(r.allocation_id().unwrap(), ROOT_ALLOCATION_ID);
        assert!(r.type_instance().is_object());
    }

    #[test]
    fn test_text_form() {
        let net = Reference::network(member(2, 1, 3), MPO::new(1, 2, 3), 4);
        assert_eq!(net.to_string(), "net:1.2.3:4:513.3");
        assert_eq!(net.to_string().parse::<Reference>().unwrap(), net);

        let heap = Reference::heap(member(2, 1, 3), 9, HeapPtr(0xabc));
        assert_eq!(heap.to_string(), "heap:9:0xabc:513.3");
        assert_eq!(heap.to_string().parse::<Reference>().unwrap(), heap);

        assert!("bogus:1:2:3.4".parse::<Reference>().is_err());
    }

    #[test]
    fn test_ordering_compares_mpo_first() {
        let a = Reference::network(member(9, 0, 0), MPO::new(0, 0, 1), 9);
        let b = Reference::network(member(1, 0, 0), MPO::new(0, 0, 2), 0);
        assert!(a < b);
    }
}
