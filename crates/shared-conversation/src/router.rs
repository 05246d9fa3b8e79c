//! # Router
//!
//! One per node. Owns the node's connections and its live conversations,
//! and maps every inbound envelope onto one of them.
//!
//! ```text
//!  transport ──► ConnectionPort ──► dispatch loop
//!                                     │
//!                 activity known? ────┼── yes ──► that conversation's inbox
//!                                     │
//!                 request? ───────────┴── yes ──► spawn task:
//!                                                  handler.handle(conv, from, req)
//!                                                  ──► Response | Failure back on `from`
//! ```
//!
//! Activities started here get ids `(origin, sequence)` where `origin` is
//! this router's UUID.

use crate::connection::{ConnectionId, ConnectionPort, Inbound, InboundEvent, RouterEvent};
use crate::conversation::Conversation;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{
    ActivityId, ConversationError, Envelope, MessageBody, NodeRole, RemoteError, Request,
    Response, SpaceError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Role-specific request handling.
///
/// `conversation` continues the activity of the request, so nested requests
/// the handler sends carry the same `ActivityId`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Answer `request`, which arrived on `from`.
    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError>;
}

struct RouterInner {
    role: NodeRole,
    origin: Uuid,
    sequence: AtomicU32,
    next_connection: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Envelope>>>,
    conversations: RwLock<HashMap<ActivityId, mpsc::UnboundedSender<Inbound>>>,
    handler: Arc<dyn RequestHandler>,
    events: mpsc::UnboundedSender<RouterEvent>,
    stopped: AtomicBool,
}

/// Cheap-to-clone handle to a node's router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router for `role` and spawn its dispatch loop.
    pub fn start(role: NodeRole, handler: Arc<dyn RequestHandler>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let router = Self {
            inner: Arc::new(RouterInner {
                role,
                origin: Uuid::new_v4(),
                sequence: AtomicU32::new(0),
                next_connection: AtomicU64::new(1),
                connections: RwLock::new(HashMap::new()),
                conversations: RwLock::new(HashMap::new()),
                handler,
                events,
                stopped: AtomicBool::new(false),
            }),
        };
        tokio::spawn(router.clone().dispatch_loop(receiver));
        info!(role = %role, origin = %router.inner.origin, "[conversation] router started");
        router
    }

    /// Role of this node.
    pub fn role(&self) -> NodeRole {
        self.inner.role
    }

    /// Router instance id, the origin of locally started activities.
    pub fn origin(&self) -> Uuid {
        self.inner.origin
    }

    pub(crate) fn handler(&self) -> Arc<dyn RequestHandler> {
        Arc::clone(&self.inner.handler)
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Register a connection whose outbound envelopes go to `outbound`.
    pub fn attach(&self, outbound: mpsc::UnboundedSender<Envelope>) -> ConnectionPort {
        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        self.inner.connections.write().insert(id, outbound);
        debug!(role = %self.inner.role, connection = %id, "[conversation] connection attached");
        ConnectionPort::new(id, self.inner.events.clone())
    }

    /// Drop a connection. Conversations awaiting it fail with
    /// `ConnectionClosed`; the peer sees the link close.
    pub fn disconnect(&self, connection: ConnectionId) {
        if self.inner.connections.write().remove(&connection).is_some() {
            let _ = self.inner.events.send(RouterEvent::Inbound(Inbound {
                connection,
                event: InboundEvent::Closed,
            }));
        }
    }

    /// Live connections.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.connections.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// True while `connection` is attached.
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.inner.connections.read().contains_key(&connection)
    }

    pub(crate) fn send(
        &self,
        connection: ConnectionId,
        envelope: Envelope,
    ) -> Result<(), ConversationError> {
        let connections = self.inner.connections.read();
        let outbound = connections
            .get(&connection)
            .ok_or_else(|| ConversationError::Unreachable(connection.to_string()))?;
        outbound
            .send(envelope)
            .map_err(|_| ConversationError::ConnectionClosed(connection.to_string()))
    }

    // =========================================================================
    // CONVERSATIONS
    // =========================================================================

    /// Start a new activity.
    pub fn begin(&self) -> Conversation {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let activity = ActivityId::new(self.inner.origin, sequence);
        self.open(activity)
    }

    fn open(&self, activity: ActivityId) -> Conversation {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        if !self.inner.stopped.load(Ordering::Acquire) {
            self.inner.conversations.write().insert(activity, inbox_tx);
        }
        Conversation::new(self.clone(), activity, inbox)
    }

    pub(crate) fn close_conversation(&self, activity: ActivityId) {
        self.inner.conversations.write().remove(&activity);
    }

    /// Conversations currently open on this node.
    pub fn conversation_count(&self) -> usize {
        self.inner.conversations.read().len()
    }

    /// Stop dispatching. Open conversations fail with `Stopped`.
    pub fn shutdown(&self) {
        let _ = self.inner.events.send(RouterEvent::Shutdown);
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    async fn dispatch_loop(self, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RouterEvent::Inbound(inbound) => self.dispatch(inbound),
                RouterEvent::Shutdown => break,
            }
        }
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.connections.write().clear();
        self.inner.conversations.write().clear();
        info!(role = %self.inner.role, "[conversation] router stopped");
    }

    fn dispatch(&self, inbound: Inbound) {
        let connection = inbound.connection;
        let envelope = match inbound.event {
            InboundEvent::Closed => {
                self.connection_closed(connection);
                return;
            }
            InboundEvent::Envelope(envelope) => envelope,
        };

        if let Err(err) = envelope.check_version() {
            error!(role = %self.inner.role, %connection, error = %err, "[conversation] rejected envelope");
            if envelope.is_request() {
                let failure = RemoteError::from(&SpaceError::from(err));
                let _ = self.send(
                    connection,
                    Envelope::failure(envelope.activity, self.inner.role, envelope.exchange, failure),
                );
            }
            return;
        }

        let activity = envelope.activity;
        let exchange = envelope.exchange;
        let existing = self.inner.conversations.read().get(&activity).cloned();
        if let Some(inbox) = existing {
            let forwarded = inbox.send(Inbound {
                connection,
                event: InboundEvent::Envelope(envelope),
            });
            if forwarded.is_ok() {
                return;
            }
            // Conversation finished between lookup and send.
            self.close_conversation(activity);
            warn!(%activity, %connection, "[conversation] message for a finished conversation");
            return;
        }

        match envelope.body {
            MessageBody::Request(request) => {
                self.spawn_handler(connection, activity, exchange, request)
            }
            other => {
                warn!(
                    role = %self.inner.role,
                    %activity,
                    %connection,
                    message = other.name(),
                    "[conversation] dropping message for unknown activity"
                );
            }
        }
    }

    fn spawn_handler(
        &self,
        from: ConnectionId,
        activity: ActivityId,
        exchange: u32,
        request: Request,
    ) {
        let mut conversation = self.open(activity);
        let router = self.clone();
        debug!(role = %self.inner.role, %activity, %from, request = request.name(), "[conversation] new conversation");

        tokio::spawn(async move {
            let handler = router.handler();
            let result = handler.handle(&mut conversation, from, request).await;
            drop(conversation);
            router.reply(from, activity, exchange, result);
        });
    }

    pub(crate) fn reply(
        &self,
        to: ConnectionId,
        activity: ActivityId,
        exchange: u32,
        result: Result<Response, SpaceError>,
    ) {
        let role = self.inner.role;
        let envelope = match result {
            Ok(response) => Envelope::response(activity, role, exchange, response),
            Err(err) => {
                if err.is_fatal() {
                    error!(role = %role, %activity, error = %err, "[conversation] request failed");
                } else {
                    warn!(role = %role, %activity, error = %err, "[conversation] request failed");
                }
                Envelope::failure(activity, role, exchange, RemoteError::from(&err))
            }
        };
        if let Err(err) = self.send(to, envelope) {
            warn!(role = %role, %activity, connection = %to, error = %err, "[conversation] reply not delivered");
        }
    }

    fn connection_closed(&self, connection: ConnectionId) {
        self.inner.connections.write().remove(&connection);
        let inboxes: Vec<_> = self.inner.conversations.read().values().cloned().collect();
        for inbox in inboxes {
            let _ = inbox.send(Inbound {
                connection,
                event: InboundEvent::Closed,
            });
        }
        info!(role = %self.inner.role, %connection, "[conversation] connection closed");
    }
}
