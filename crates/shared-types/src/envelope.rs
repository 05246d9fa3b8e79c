//! # Conversation Envelope
//!
//! Every message on a connection is an [`Envelope`]: the activity it belongs
//! to, the sender's role and one request, response or failure.
//!
//! - **Versioning**: receivers reject envelopes from another protocol version.
//! - **Correlation**: the `ActivityId` picks the conversation and the
//!   `exchange` number picks the request within it. A response echoes the
//!   exchange of its request and travels back on the connection the request
//!   arrived on.

use crate::errors::{ProtocolError, RemoteError};
use crate::ipc::{NodeRole, Request, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Identity of one logical activity across every hop it travels.
///
/// `origin` names the router instance that started the activity and
/// `sequence` is that router's counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId {
    /// Initiating router instance.
    pub origin: Uuid,
    /// Per-origin sequence number.
    pub sequence: u32,
}

impl ActivityId {
    /// Create an activity id.
    pub const fn new(origin: Uuid, sequence: u32) -> Self {
        Self { origin, sequence }
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

/// Payload of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// A request.
    Request(Request),
    /// A successful response.
    Response(Response),
    /// A failed request.
    Failure(RemoteError),
}

impl MessageBody {
    /// Name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::Request(request) => request.name(),
            MessageBody::Response(response) => response.name(),
            MessageBody::Failure(_) => "Failure",
        }
    }
}

/// The unit sent over a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version.
    pub version: u16,
    /// Activity the message belongs to.
    pub activity: ActivityId,
    /// Role of the sending node.
    pub sender: NodeRole,
    /// Request number within the activity, chosen by the requester and
    /// echoed by the response.
    pub exchange: u32,
    /// Message.
    pub body: MessageBody,
}

impl Envelope {
    /// Wrap request number `exchange` of `activity`.
    pub fn request(
        activity: ActivityId,
        sender: NodeRole,
        exchange: u32,
        request: Request,
    ) -> Self {
        Self::new(activity, sender, exchange, MessageBody::Request(request))
    }

    /// Wrap the response to request `exchange`.
    pub fn response(
        activity: ActivityId,
        sender: NodeRole,
        exchange: u32,
        response: Response,
    ) -> Self {
        Self::new(activity, sender, exchange, MessageBody::Response(response))
    }

    /// Wrap the failure of request `exchange`.
    pub fn failure(
        activity: ActivityId,
        sender: NodeRole,
        exchange: u32,
        error: RemoteError,
    ) -> Self {
        Self::new(activity, sender, exchange, MessageBody::Failure(error))
    }

    fn new(activity: ActivityId, sender: NodeRole, exchange: u32, body: MessageBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            activity,
            sender,
            exchange,
            body,
        }
    }

    /// True for requests.
    pub fn is_request(&self) -> bool {
        matches!(self.body, MessageBody::Request(_))
    }

    /// Reject envelopes of another protocol version.
    pub fn check_version(&self) -> Result<(), ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                received: self.version,
                supported: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::ipc::PingTarget;

    fn activity() -> ActivityId {
        ActivityId::new(Uuid::new_v4(), 1)
    }

    #[test]
    fn test_constructors_set_version() {
        let env = Envelope::request(
            activity(),
            NodeRole::Leaf,
            3,
            Request::Ping {
                target: PingTarget::Node,
            },
        );
        assert!(env.is_request());
        assert!(env.check_version().is_ok());
        assert_eq!(env.body.name(), "Ping");
        assert_eq!(env.exchange, 3);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut env = Envelope::response(activity(), NodeRole::Root, 0, Response::Stashed);
        env.version = 99;
        assert!(matches!(
            env.check_version(),
            Err(ProtocolError::UnsupportedVersion { received: 99, .. })
        ));
    }

    #[test]
    fn test_failure_body() {
        let env = Envelope::failure(
            activity(),
            NodeRole::Root,
            0,
            RemoteError {
                kind: ErrorKind::Lock,
                message: "busy".into(),
            },
        );
        assert!(!env.is_request());
        assert_eq!(env.body.name(), "Failure");
    }
}
