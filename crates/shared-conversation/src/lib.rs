//! # Shared Conversation
//!
//! Request/response substrate connecting node roles.
//!
//! ## Architecture
//!
//! Every node runs one [`Router`]. A request starts an activity; every hop
//! the activity takes (including calls back down to the node that started
//! it) carries the same [`ActivityId`](shared_types::ActivityId), so a node
//! waiting on a response can serve requests belonging to its own activity.
//!
//! ```text
//! ┌────────┐  memory::link / tcp  ┌────────┐
//! │ Router │◄────────────────────►│ Router │
//! └───┬────┘                      └───┬────┘
//!     │ begin()                       │ spawn per new activity
//!     ▼                               ▼
//! Conversation ── request ──►   RequestHandler::handle(conversation, from, request)
//! ```
//!
//! ## Failure model
//!
//! - Disconnect of an awaited connection: `ConversationError::ConnectionClosed`.
//! - Response from a connection nothing was awaited from: `ProtocolError`.
//! - Handler errors travel as `Failure(RemoteError)` and keep their kind.
//! - No timeouts, no retries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod connection;
pub mod conversation;
pub mod memory;
pub mod router;
pub mod tcp;

pub use codec::{decode_body, encode_frame, read_frame, write_frame, DEFAULT_MAX_FRAME};
pub use connection::{ConnectionId, ConnectionPort, Inbound, InboundEvent};
pub use conversation::Conversation;
pub use router::{RequestHandler, Router};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
