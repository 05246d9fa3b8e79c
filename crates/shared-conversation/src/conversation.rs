//! # Conversation
//!
//! One activity's view of the router: send a request, await its response,
//! and serve any request that arrives for the same activity meanwhile.
//!
//! ```text
//! leaf owner            leaf                 root
//!    │ request(ListNodes) ─────────────────────►│
//!    │                    │◄── ListNodes (same activity) ── handler fan-out
//!    │  nested dispatch ──► handler ── Nodes ──►│
//!    │◄──────────────────────────────── Nodes ──│
//! ```
//!
//! At most one response is outstanding per connection. Every request gets
//! the next exchange number of the conversation and its response must echo
//! it; responses to requests already given up on are dropped. A response
//! from a connection nothing was awaited from is a `ProtocolError`; a
//! closed awaited connection is `ConversationError::ConnectionClosed`.
//! There are no timeouts and no retries.

use crate::connection::{ConnectionId, Inbound, InboundEvent};
use crate::router::Router;
use shared_types::{
    ActivityId, ConversationError, Envelope, MessageBody, NodeRole, ProtocolError, Request,
    Response, SpaceError,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// An open activity on one node. Closing happens on drop.
pub struct Conversation {
    router: Router,
    activity: ActivityId,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    next_exchange: u32,
    awaiting: Vec<(ConnectionId, u32)>,
}

impl Conversation {
    pub(crate) fn new(
        router: Router,
        activity: ActivityId,
        inbox: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        Self {
            router,
            activity,
            inbox,
            next_exchange: 0,
            awaiting: Vec::new(),
        }
    }

    /// Activity id carried by every message of this conversation.
    pub fn activity(&self) -> ActivityId {
        self.activity
    }

    /// Router this conversation runs on.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Role of the local node.
    pub fn role(&self) -> NodeRole {
        self.router.role()
    }

    /// Connections with an outstanding request, innermost last.
    pub fn awaiting(&self) -> Vec<ConnectionId> {
        self.awaiting.iter().map(|(connection, _)| *connection).collect()
    }

    fn is_awaiting(&self, connection: ConnectionId) -> bool {
        self.awaiting.iter().any(|(awaited, _)| *awaited == connection)
    }

    /// Send `request` on `connection` and wait for its response.
    ///
    /// Requests for this activity that arrive while waiting are handled
    /// in place and answered before waiting continues.
    pub async fn request(
        &mut self,
        connection: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        if self.is_awaiting(connection) {
            return Err(ConversationError::AlreadyAwaiting {
                activity: self.activity.to_string(),
                connection: connection.to_string(),
            }
            .into());
        }

        let exchange = self.next_exchange;
        self.next_exchange = self.next_exchange.wrapping_add(1);
        debug!(activity = %self.activity, %connection, exchange, request = request.name(), "[conversation] request");
        self.router.send(
            connection,
            Envelope::request(self.activity, self.router.role(), exchange, request),
        )?;

        self.awaiting.push((connection, exchange));
        let result = self.await_response(connection, exchange).await;
        self.awaiting.pop();
        result
    }

    async fn await_response(
        &mut self,
        connection: ConnectionId,
        exchange: u32,
    ) -> Result<Response, SpaceError> {
        loop {
            let inbound = self
                .inbox
                .recv()
                .await
                .ok_or(ConversationError::Stopped)?;
            let from = inbound.connection;

            let envelope = match inbound.event {
                InboundEvent::Closed => {
                    if self.is_awaiting(from) {
                        return Err(ConversationError::ConnectionClosed(from.to_string()).into());
                    }
                    continue;
                }
                InboundEvent::Envelope(envelope) => envelope,
            };

            let answers = envelope.exchange;
            match envelope.body {
                MessageBody::Request(nested) => self.serve_nested(from, answers, nested).await,
                other if answers != exchange => {
                    warn!(
                        activity = %self.activity,
                        %from,
                        exchange = answers,
                        message = other.name(),
                        "[conversation] dropping response to an abandoned request"
                    );
                }
                MessageBody::Response(response) if from == connection => return Ok(response),
                MessageBody::Failure(remote) if from == connection => return Err(remote.into()),
                _ => return Err(ProtocolError::UnexpectedSender(from.to_string()).into()),
            }
        }
    }

    async fn serve_nested(&mut self, from: ConnectionId, exchange: u32, request: Request) {
        debug!(activity = %self.activity, %from, exchange, request = request.name(), "[conversation] nested request");
        let handler = self.router.handler();
        let result = handler.handle(self, from, request).await;
        self.router.reply(from, self.activity, exchange, result);
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.router.close_conversation(self.activity);
    }
}
