//! # Error Types
//!
//! The error taxonomy shared by every layer.
//!
//! | Error | Meaning | Severity |
//! |-------|---------|----------|
//! | `AddressError` | invalid, foreign or out-of-range reference/index | fatal |
//! | `SnapshotError` | corrupt buffer or unresolvable index on load | fatal |
//! | `ProtocolError` | message unexpected for the receiving role | fatal |
//! | `LockError` | conflicting or duplicate lock, invalid upgrade | recoverable |
//! | `ConversationError` | unreachable node, connection dropped | recoverable |
//!
//! Fatal errors signal an invariant violation in the producing layer and
//! must not be swallowed. Recoverable errors let the caller retry or abort
//! the enclosing activity.

use crate::identity::{Instance, TimeStamp};
use crate::ipc::NodeRole;
use crate::mpo::{OwnerId, MPO};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference and index errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Access through a default-constructed or otherwise invalid reference.
    #[error("Invalid reference")]
    InvalidReference,

    /// Accessor used on the other reference variant.
    #[error("Expected a {expected} address, found a {found} address")]
    WrongVariant {
        /// Variant the accessor needs.
        expected: &'static str,
        /// Variant actually held.
        found: &'static str,
    },

    /// Heap pointer unknown to this process.
    #[error("Heap address {heap:#x} of owner {owner} did not originate in this process")]
    ForeignHeap {
        /// Owner slot in the reference.
        owner: OwnerId,
        /// Raw pointer value.
        heap: u64,
    },

    /// Table index past the end.
    #[error("Index {index} out of range (table holds {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Table length.
        len: usize,
    },

    /// Reference already bound to a different index.
    #[error("Reference already bound to index {index}")]
    AlreadyBound {
        /// Existing binding.
        index: usize,
    },

    /// Symbol-encoded type used where an object type is needed.
    #[error("Type {0} is symbol encoded and names no object")]
    SymbolType(i16),

    /// Instance outside its type's domain.
    #[error("Instance {instance} outside domain of size {domain_size}")]
    InstanceOutOfDomain {
        /// Instance.
        instance: Instance,
        /// Domain size.
        domain_size: Instance,
    },

    /// Address or owner that was never allocated.
    #[error("Not allocated: {0}")]
    NotAllocated(String),

    /// Allocator has no free slot.
    #[error("{what} exhausted (capacity {capacity})")]
    Exhausted {
        /// What ran out.
        what: String,
        /// Capacity of the allocator.
        capacity: usize,
    },

    /// Unparseable text form.
    #[error("Malformed {0}")]
    Malformed(String),
}

/// Lock arbitration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Another owner holds an incompatible lock.
    #[error("Lock on {target} conflicts with lock held by {holder}")]
    Conflict {
        /// Locked owner.
        target: MPO,
        /// Current holder.
        holder: MPO,
    },

    /// Requester already holds this lock.
    #[error("{requester} already holds this lock on {target}")]
    Duplicate {
        /// Requesting owner.
        requester: MPO,
        /// Locked owner.
        target: MPO,
    },

    /// Upgrade while other readers are present.
    #[error("Cannot upgrade lock on {target}: {readers} other reader(s)")]
    InvalidUpgrade {
        /// Locked owner.
        target: MPO,
        /// Other readers.
        readers: usize,
    },

    /// Release of a lock that is not held.
    #[error("{requester} holds no lock on {target}")]
    NotHeld {
        /// Requesting owner.
        requester: MPO,
        /// Target owner.
        target: MPO,
    },

    /// Release refers to a grant from another cycle.
    #[error("Stale grant on {target}: granted at cycle {granted}, released at {released}")]
    StaleGrant {
        /// Locked owner.
        target: MPO,
        /// Cycle recorded by the authority.
        granted: TimeStamp,
        /// Cycle named in the release.
        released: TimeStamp,
    },
}

/// Conversation transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// Peer disconnected while a response was outstanding.
    #[error("Connection {0} closed mid-conversation")]
    ConnectionClosed(String),

    /// No connection to the required node.
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// A response is already outstanding on this connection.
    #[error("Activity {activity} already awaits a response from {connection}")]
    AlreadyAwaiting {
        /// Activity id.
        activity: String,
        /// Connection awaited.
        connection: String,
    },

    /// Router shut down.
    #[error("Router stopped")]
    Stopped,
}

/// Snapshot encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Buffer cannot be decoded.
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// Magic bytes do not match.
    #[error("Not a snapshot (bad magic)")]
    BadMagic,

    /// Format version not supported.
    #[error("Unsupported snapshot version {found}, expected {supported}")]
    UnsupportedVersion {
        /// Version in the header.
        found: u16,
        /// Version this build reads.
        supported: u16,
    },

    /// Body checksum does not match the header.
    #[error("Snapshot checksum mismatch")]
    ChecksumMismatch,

    /// Index in buffer or roots that the table cannot resolve.
    #[error("Unresolvable index {index} (table holds {len})")]
    UnresolvedIndex {
        /// Index found.
        index: u32,
        /// Table length.
        len: usize,
    },

    /// Heap address in a table being persisted.
    #[error("Heap address at index {0} cannot be persisted")]
    HeapAddress(usize),

    /// Storage failure.
    #[error("Snapshot storage error: {0}")]
    Storage(String),
}

/// Message routing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Message type not accepted by the receiving role.
    #[error("{role} does not accept {message}")]
    UnexpectedMessage {
        /// Receiving role.
        role: NodeRole,
        /// Message name.
        message: &'static str,
    },

    /// Response of the wrong type.
    #[error("Expected {expected} response, got {found}")]
    UnexpectedResponse {
        /// Response expected.
        expected: &'static str,
        /// Response received.
        found: &'static str,
    },

    /// Response arrived on a connection nothing was awaited from.
    #[error("Response from unexpected connection {0}")]
    UnexpectedSender(String),

    /// Protocol version mismatch.
    #[error("Unsupported protocol version: received {received}, supported {supported}")]
    UnsupportedVersion {
        /// Version received.
        received: u16,
        /// Version supported.
        supported: u16,
    },

    /// Frame could not be decoded.
    #[error("Undecodable frame: {0}")]
    Decode(String),

    /// Frame larger than allowed.
    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared size.
        size: usize,
        /// Limit.
        max: usize,
    },
}

// =============================================================================
// UNIFIED ERROR
// =============================================================================

/// Error category, preserved when an error crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// `AddressError`.
    Address,
    /// `LockError`.
    Lock,
    /// `ConversationError`.
    Conversation,
    /// `SnapshotError`.
    Snapshot,
    /// `ProtocolError`.
    Protocol,
}

impl ErrorKind {
    /// Address, snapshot and protocol errors are invariant violations.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Address | ErrorKind::Snapshot | ErrorKind::Protocol
        )
    }
}

/// Error reported by a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?} error from remote: {message}")]
pub struct RemoteError {
    /// Category of the original error.
    pub kind: ErrorKind,
    /// Rendered original error.
    pub message: String,
}

/// Any error of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpaceError {
    /// Address error.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// Lock error.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Conversation error.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    /// Snapshot error.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Error raised by a remote node.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SpaceError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpaceError::Address(_) => ErrorKind::Address,
            SpaceError::Lock(_) => ErrorKind::Lock,
            SpaceError::Conversation(_) => ErrorKind::Conversation,
            SpaceError::Snapshot(_) => ErrorKind::Snapshot,
            SpaceError::Protocol(_) => ErrorKind::Protocol,
            SpaceError::Remote(remote) => remote.kind,
        }
    }

    /// True when the local operation must not continue.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// True when the caller may retry or abort the activity.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<&SpaceError> for RemoteError {
    fn from(error: &SpaceError) -> Self {
        match error {
            SpaceError::Remote(remote) => remote.clone(),
            other => RemoteError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_split() {
        assert!(SpaceError::from(AddressError::InvalidReference).is_fatal());
        assert!(SpaceError::from(SnapshotError::BadMagic).is_fatal());
        assert!(SpaceError::from(ProtocolError::Decode("x".into())).is_fatal());
        assert!(SpaceError::from(LockError::Conflict {
            target: MPO::new(0, 0, 1),
            holder: MPO::new(0, 0, 2),
        })
        .is_recoverable());
        assert!(SpaceError::from(ConversationError::ConnectionClosed("c1".into())).is_recoverable());
    }

    #[test]
    fn test_lock_error_names_mpo() {
        let err = LockError::Conflict {
            target: MPO::new(1, 2, 3),
            holder: MPO::new(4, 5, 6),
        };
        assert!(err.to_string().contains("1.2.3"));
        assert!(err.to_string().contains("4.5.6"));
    }

    #[test]
    fn test_remote_error_keeps_kind() {
        let local = SpaceError::from(LockError::NotHeld {
            requester: MPO::new(0, 0, 1),
            target: MPO::new(0, 0, 2),
        });
        let remote = RemoteError::from(&local);
        assert_eq!(remote.kind, ErrorKind::Lock);
        assert!(remote.message.contains("0.0.2"));

        let rebuilt = SpaceError::from(remote.clone());
        assert_eq!(rebuilt.kind(), ErrorKind::Lock);
        assert!(rebuilt.is_recoverable());
        assert_eq!(RemoteError::from(&rebuilt), remote);
    }

    #[test]
    fn test_foreign_heap_message() {
        let err = AddressError::ForeignHeap {
            owner: 3,
            heap: 0xff,
        };
        assert!(err.to_string().contains("0xff"));
    }
}
