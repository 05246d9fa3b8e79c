//! # Driving Ports (Inbound API)
//!
//! What a node of a given role exposes to the conversation layer.

use async_trait::async_trait;
use shared_conversation::{ConnectionId, Conversation};
use shared_types::{NodeRole, Request, Response, SpaceError, MPO};

/// One node role.
///
/// Exactly one implementation exists per role (`RootNode`, `DaemonNode`,
/// `LeafNode`, `ExecutorContext`, `ToolContext`). The conversation layer
/// reaches it through `NodeHandler`, which answers the requests every role
/// shares and hands the rest to [`NodeContext::handle`].
///
/// # Example
///
/// ```rust,ignore
/// let root = Arc::new(RootNode::new("root", store));
/// let router = Router::start(NodeRole::Root, Arc::new(NodeHandler::new(root.clone())));
/// ```
#[async_trait]
pub trait NodeContext: Send + Sync + 'static {
    /// Role of this node.
    fn role(&self) -> NodeRole;

    /// Name used in status reports.
    fn name(&self) -> String;

    /// Connection towards Root, if this node has one.
    fn upstream(&self) -> Option<ConnectionId>;

    /// Connections to nodes enroled below this one.
    fn downstream(&self) -> Vec<ConnectionId>;

    /// Owners hosted by this node.
    fn owners(&self) -> Vec<MPO> {
        Vec::new()
    }

    /// Answer a request that is not common to every role.
    ///
    /// `conversation` continues the request's activity; forwarding a
    /// request upstream through it keeps the activity id.
    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError>;
}
