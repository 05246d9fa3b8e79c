//! Leaf: one per process slot. Its executor's owners talk to Root through
//! it.

use crate::ports::NodeContext;
use crate::roles::{forward_upstream, reject, unexpected};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_conversation::{ConnectionId, Conversation, Router};
use shared_types::{NodeRole, Request, Response, SpaceError, MP};
use tracing::info;

/// Leaf node context.
pub struct LeafNode {
    name: String,
    upstream: RwLock<Option<ConnectionId>>,
    mp: RwLock<Option<MP>>,
    executors: RwLock<Vec<ConnectionId>>,
}

impl LeafNode {
    /// Leaf not yet enroled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upstream: RwLock::new(None),
            mp: RwLock::new(None),
            executors: RwLock::new(Vec::new()),
        }
    }

    /// Process slot assigned by Root.
    pub fn mp(&self) -> Option<MP> {
        *self.mp.read()
    }

    /// Enrole through the daemon at `upstream`.
    pub async fn enrole(&self, router: &Router, upstream: ConnectionId) -> Result<MP, SpaceError> {
        *self.upstream.write() = Some(upstream);
        let mut conversation = router.begin();
        // The daemon fills in its machine.
        match conversation
            .request(upstream, Request::EnroleLeaf { machine: 0 })
            .await?
        {
            Response::LeafEnroled { mp } => {
                *self.mp.write() = Some(mp);
                info!(name = %self.name, %mp, "[ps-04] leaf ready");
                Ok(mp)
            }
            other => Err(unexpected("LeafEnroled", &other)),
        }
    }

    /// Record the connection to an executor of this process.
    pub fn attach_executor(&self, connection: ConnectionId) {
        let mut executors = self.executors.write();
        if !executors.contains(&connection) {
            executors.push(connection);
        }
    }
}

#[async_trait]
impl NodeContext for LeafNode {
    fn role(&self) -> NodeRole {
        NodeRole::Leaf
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn upstream(&self) -> Option<ConnectionId> {
        *self.upstream.read()
    }

    fn downstream(&self) -> Vec<ConnectionId> {
        self.executors.read().clone()
    }

    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        match request {
            Request::EnroleDaemon | Request::EnroleLeaf { .. } => Err(reject(self, &request)),
            other => forward_upstream(self, conversation, from, other).await,
        }
    }
}
