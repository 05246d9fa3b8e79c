//! # Identity Types
//!
//! `TypeId` and `TypeInstance`: the compile-time identity of a schema element
//! plus the runtime instance disambiguator for array-like elements.
//!
//! ## TypeId Encodings
//!
//! A `TypeId` is a 16-bit signed value. The sign bit is the tag that selects
//! exactly one of two encodings:
//!
//! ```text
//!  15   14 ........... 8   7 ........... 0
//! +---+------------------+-----------------+
//! | 0 |    object id     |  sub-object id  |   context encoding
//! +---+------------------+-----------------+
//! | 1 |        global symbol id (< 0)      |   symbol encoding
//! +---+------------------------------------+
//! ```
//!
//! Field accessors check the tag first and return `None` for the other
//! encoding; nothing ever interprets symbol bits as object/sub-object fields.

use crate::errors::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime instance within the domain of a `TypeId`.
pub type Instance = u16;

/// Object identifier in the context encoding (7 bits).
pub type ObjectId = u8;

/// Sub-object identifier in the context encoding (8 bits).
pub type SubObjectId = u8;

/// Logical cycle counter. Zero means "never" / "not held".
pub type TimeStamp = u32;

/// Largest object id representable in the context encoding.
pub const MAX_OBJECT_ID: ObjectId = 0x7F;

/// Context-encoded type of every owner's root object.
pub const ROOT_TYPE_ID: TypeId = TypeId::make_context(1, 0);

/// Symbol id of the root type.
pub const ROOT_SYMBOL_ID: TypeId = TypeId::from_raw(-1);

/// Size in bytes of a packed `TypeInstance`.
pub const TYPE_INSTANCE_SIZE: usize = 4;

// =============================================================================
// TYPE ID
// =============================================================================

/// 16-bit type identifier with a symbol or a context encoding.
///
/// `TypeId::default()` (raw zero) is the invalid type.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TypeId(i16);

/// Decoded view of a `TypeId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeIdEncoding {
    /// Global compile-time symbol.
    Symbol(i16),
    /// Schema element inside an object.
    Context {
        /// Object identifier.
        object_id: ObjectId,
        /// Sub-object (member) identifier.
        sub_object_id: SubObjectId,
    },
}

impl TypeId {
    /// Wrap a raw 16-bit value.
    pub const fn from_raw(value: i16) -> Self {
        Self(value)
    }

    /// The raw 16-bit value.
    pub const fn raw(self) -> i16 {
        self.0
    }

    /// Build a context-encoded id. The object id is truncated to 7 bits.
    pub const fn make_context(object_id: ObjectId, sub_object_id: SubObjectId) -> Self {
        let bits = (((object_id & MAX_OBJECT_ID) as u16) << 8) | sub_object_id as u16;
        Self(bits as i16)
    }

    /// Build a symbol-encoded id. Symbol ids are strictly negative.
    pub fn make_symbol(symbol: i16) -> Result<Self, AddressError> {
        if symbol >= 0 {
            return Err(AddressError::Malformed(format!(
                "symbol id {symbol} must be negative"
            )));
        }
        Ok(Self(symbol))
    }

    /// True when the sign bit selects the symbol encoding.
    pub const fn is_symbol(self) -> bool {
        self.0 < 0
    }

    /// True when the sign bit selects the context encoding.
    pub const fn is_context(self) -> bool {
        self.0 >= 0
    }

    /// Zero is the invalid type.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Decode the tagged value.
    pub fn encoding(self) -> TypeIdEncoding {
        if self.is_symbol() {
            TypeIdEncoding::Symbol(self.0)
        } else {
            let bits = self.0 as u16;
            TypeIdEncoding::Context {
                object_id: (bits >> 8) as ObjectId,
                sub_object_id: (bits & 0xFF) as SubObjectId,
            }
        }
    }

    /// Object id, if context encoded.
    pub fn object_id(self) -> Option<ObjectId> {
        match self.encoding() {
            TypeIdEncoding::Context { object_id, .. } => Some(object_id),
            TypeIdEncoding::Symbol(_) => None,
        }
    }

    /// Sub-object id, if context encoded.
    pub fn sub_object_id(self) -> Option<SubObjectId> {
        match self.encoding() {
            TypeIdEncoding::Context { sub_object_id, .. } => Some(sub_object_id),
            TypeIdEncoding::Symbol(_) => None,
        }
    }

    /// Symbol id, if symbol encoded.
    pub fn symbol_id(self) -> Option<i16> {
        match self.encoding() {
            TypeIdEncoding::Symbol(symbol) => Some(symbol),
            TypeIdEncoding::Context { .. } => None,
        }
    }

    /// The owning object's type: same object id, sub-object zeroed.
    pub fn object_type(self) -> Result<Self, AddressError> {
        match self.encoding() {
            TypeIdEncoding::Context { object_id, .. } => Ok(Self::make_context(object_id, 0)),
            TypeIdEncoding::Symbol(symbol) => Err(AddressError::SymbolType(symbol)),
        }
    }

    /// True for a valid context id naming an object root.
    pub fn is_object(self) -> bool {
        self.is_valid() && self.sub_object_id() == Some(0)
    }
}

impl From<i16> for TypeId {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TypeId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i16>()
            .map(Self)
            .map_err(|e| AddressError::Malformed(format!("type id '{s}': {e}")))
    }
}

// =============================================================================
// TYPE INSTANCE
// =============================================================================

/// A `TypeId` plus the instance within its domain.
///
/// Packed layout (stable, little-endian): `[type_id: i16][instance: u16]`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TypeInstance {
    /// Schema element identity.
    pub type_id: TypeId,
    /// Instance within the element's domain. Zero for singular elements.
    pub instance: Instance,
}

impl TypeInstance {
    /// Create a type instance.
    pub const fn new(type_id: TypeId, instance: Instance) -> Self {
        Self { type_id, instance }
    }

    /// The root object of an owner.
    pub const fn make_root() -> Self {
        Self::new(ROOT_TYPE_ID, 0)
    }

    /// Object-root instance for the object owning `type_id`.
    pub fn make_object(type_id: TypeId) -> Result<Self, AddressError> {
        Ok(Self::new(type_id.object_type()?, 0))
    }

    /// Valid when the type is valid.
    pub const fn is_valid(&self) -> bool {
        self.type_id.is_valid()
    }

    /// True when this addresses an object root.
    pub fn is_object(&self) -> bool {
        self.type_id.is_object() && self.instance == 0
    }

    /// Enforce `instance < domain_size`.
    pub fn check_domain(&self, domain_size: Instance) -> Result<(), AddressError> {
        if self.instance >= domain_size {
            return Err(AddressError::InstanceOutOfDomain {
                instance: self.instance,
                domain_size,
            });
        }
        Ok(())
    }

    /// Packed 4-byte form.
    pub fn to_bytes(self) -> [u8; TYPE_INSTANCE_SIZE] {
        let t = self.type_id.raw().to_le_bytes();
        let i = self.instance.to_le_bytes();
        [t[0], t[1], i[0], i[1]]
    }

    /// Inverse of [`TypeInstance::to_bytes`].
    pub fn from_bytes(bytes: [u8; TYPE_INSTANCE_SIZE]) -> Self {
        Self::new(
            TypeId::from_raw(i16::from_le_bytes([bytes[0], bytes[1]])),
            u16::from_le_bytes([bytes[2], bytes[3]]),
        )
    }
}

impl fmt::Display for TypeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_id, self.instance)
    }
}

impl FromStr for TypeInstance {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, instance_part) = s
            .rsplit_once('.')
            .ok_or_else(|| AddressError::Malformed(format!("type instance '{s}'")))?;
        let instance = instance_part
            .parse::<Instance>()
            .map_err(|e| AddressError::Malformed(format!("instance '{instance_part}': {e}")))?;
        Ok(Self::new(type_part.parse()?, instance))
    }
}
