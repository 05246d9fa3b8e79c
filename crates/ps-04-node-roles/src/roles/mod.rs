//! # Node Roles
//!
//! ```text
//!                 Root ◄──────────── Tool
//!                  ▲
//!                Daemon          (one per machine)
//!                  ▲
//!                 Leaf           (one per process slot)
//!                  ▲
//!               Executor         (owners run here)
//! ```
//!
//! Requests travel upward until they reach a node that handles them
//! (`Request::handled_by`). `Ping { Node }` and `ListNodes` are answered by
//! every role through [`NodeHandler`]; everything else is Root's.

pub mod daemon;
pub mod executor;
pub mod leaf;
pub mod root;
pub mod tool;

pub use daemon::DaemonNode;
pub use executor::{Executor, ExecutorContext};
pub use leaf::LeafNode;
pub use root::RootNode;
pub use tool::{Tool, ToolContext};

use crate::ports::NodeContext;
use async_trait::async_trait;
use shared_conversation::{ConnectionId, Conversation, RequestHandler};
use shared_types::{
    ConversationError, NodeStatus, PingTarget, ProtocolError, Request, Response, SpaceError,
};
use std::sync::Arc;
use tracing::debug;

/// Adapts a [`NodeContext`] to the conversation layer.
pub struct NodeHandler<C: NodeContext> {
    context: Arc<C>,
}

impl<C: NodeContext> NodeHandler<C> {
    /// Wrap `context`.
    pub fn new(context: Arc<C>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl<C: NodeContext> RequestHandler for NodeHandler<C> {
    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        let context = self.context.as_ref();
        debug!(role = %context.role(), %from, request = request.name(), "[ps-04] request");
        match request {
            Request::Ping {
                target: PingTarget::Node,
            } => Ok(Response::Pong {
                status: node_status(context, conversation),
            }),
            Request::ListNodes => Ok(Response::Nodes {
                nodes: list_subtree(context, conversation, Some(from)).await?,
            }),
            other => context.handle(conversation, from, other).await,
        }
    }
}

/// Status of the local node.
pub fn node_status<C: NodeContext + ?Sized>(context: &C, conversation: &Conversation) -> NodeStatus {
    NodeStatus {
        role: context.role(),
        name: context.name(),
        conversations: conversation.router().conversation_count(),
        owners: context.owners(),
    }
}

/// Status of the local node followed by every node below it.
///
/// `exclude` is the connection the query came from.
pub async fn list_subtree<C: NodeContext + ?Sized>(
    context: &C,
    conversation: &mut Conversation,
    exclude: Option<ConnectionId>,
) -> Result<Vec<NodeStatus>, SpaceError> {
    let mut nodes = vec![node_status(context, conversation)];
    for child in context.downstream() {
        if Some(child) == exclude || !conversation.router().is_connected(child) {
            continue;
        }
        match conversation.request(child, Request::ListNodes).await? {
            Response::Nodes { nodes: below } => nodes.extend(below),
            other => return Err(unexpected("Nodes", &other)),
        }
    }
    Ok(nodes)
}

/// Relay `request` to the node above.
pub(crate) async fn forward_upstream<C: NodeContext + ?Sized>(
    context: &C,
    conversation: &mut Conversation,
    from: ConnectionId,
    request: Request,
) -> Result<Response, SpaceError> {
    let upstream = context
        .upstream()
        .ok_or_else(|| ConversationError::Unreachable(format!("{} has no upstream", context.role())))?;
    if from == upstream {
        return Err(reject(context, &request));
    }
    debug!(role = %context.role(), request = request.name(), %upstream, "[ps-04] forwarding upstream");
    conversation.request(upstream, request).await
}

pub(crate) fn reject<C: NodeContext + ?Sized>(context: &C, request: &Request) -> SpaceError {
    ProtocolError::UnexpectedMessage {
        role: context.role(),
        message: request.name(),
    }
    .into()
}

pub(crate) fn unexpected(expected: &'static str, found: &Response) -> SpaceError {
    ProtocolError::UnexpectedResponse {
        expected,
        found: found.name(),
    }
    .into()
}
