//! Connection identities and the inbound side of a transport.

use serde::{Deserialize, Serialize};
use shared_types::Envelope;
use std::fmt;
use tokio::sync::mpsc;

/// Router-local connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// What a transport reports for one connection.
#[derive(Debug)]
pub enum InboundEvent {
    /// A decoded envelope.
    Envelope(Envelope),
    /// The connection is gone.
    Closed,
}

/// An event tagged with its connection.
#[derive(Debug)]
pub struct Inbound {
    /// Source connection.
    pub connection: ConnectionId,
    /// Event.
    pub event: InboundEvent,
}

pub(crate) enum RouterEvent {
    Inbound(Inbound),
    Shutdown,
}

/// Handle a transport uses to feed one connection into its router.
#[derive(Clone)]
pub struct ConnectionPort {
    id: ConnectionId,
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl ConnectionPort {
    pub(crate) fn new(id: ConnectionId, events: mpsc::UnboundedSender<RouterEvent>) -> Self {
        Self { id, events }
    }

    /// Connection this port feeds.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Hand a received envelope to the router. False once the router stopped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.push(InboundEvent::Envelope(envelope))
    }

    /// Report the connection as closed.
    pub fn close(&self) {
        self.push(InboundEvent::Closed);
    }

    fn push(&self, event: InboundEvent) -> bool {
        self.events
            .send(RouterEvent::Inbound(Inbound {
                connection: self.id,
                event,
            }))
            .is_ok()
    }
}
