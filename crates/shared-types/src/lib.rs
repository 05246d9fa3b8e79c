//! # Shared Types Crate
//!
//! Identity types, references, the error taxonomy and the conversation
//! message surface shared by every node role.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate or process
//!   boundary is defined here.
//! - **Value Payloads**: messages carry `MPO`, `TypeId`, `NetworkAddress`
//!   and bytes. Heap addresses cannot be serialized.
//! - **Tagged Identity**: a `TypeId` is symbol or context encoded, never
//!   both, and accessors check the tag before reading fields.
//!
//! ## Module Structure
//!
//! ```text
//! shared-types/
//! ├── identity     # TypeId, TypeInstance, TimeStamp
//! ├── mpo          # MP, MPO and their text forms
//! ├── reference    # NetworkAddress, HeapAddress, Reference, HeapResolver
//! ├── errors       # Address/Lock/Conversation/Snapshot/Protocol errors
//! ├── ipc          # NodeRole, Request, Response and payload values
//! └── envelope     # ActivityId, Envelope
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ipc;
pub mod mpo;
pub mod reference;

pub use envelope::{ActivityId, Envelope, MessageBody, PROTOCOL_VERSION};
pub use errors::*;
pub use identity::*;
pub use ipc::*;
pub use mpo::*;
pub use reference::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
