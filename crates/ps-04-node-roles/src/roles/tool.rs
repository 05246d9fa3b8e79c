//! Tool: an outside client of Root. Queries the cluster and can host a
//! single owner that it steps by hand.

use crate::domain::ProcessHeap;
use crate::owner::OwnerContext;
use crate::ports::NodeContext;
use crate::roles::{reject, unexpected, NodeHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_conversation::{ConnectionId, Conversation, Router};
use shared_types::{
    ConversationError, MachineId, NodeRole, NodeStatus, PingTarget, Program, Project, Request,
    Response, SpaceError, MPO,
};
use std::sync::Arc;
use tracing::info;

/// Tool node context.
pub struct ToolContext {
    name: String,
    upstream: RwLock<Option<ConnectionId>>,
    heap: RwLock<Option<Arc<ProcessHeap>>>,
}

#[async_trait]
impl NodeContext for ToolContext {
    fn role(&self) -> NodeRole {
        NodeRole::Tool
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn upstream(&self) -> Option<ConnectionId> {
        *self.upstream.read()
    }

    fn downstream(&self) -> Vec<ConnectionId> {
        Vec::new()
    }

    fn owners(&self) -> Vec<MPO> {
        self.heap
            .read()
            .as_ref()
            .map(|heap| heap.hosted())
            .unwrap_or_default()
    }

    async fn handle(
        &self,
        _conversation: &mut Conversation,
        _from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        Err(reject(self, &request))
    }
}

/// A tool connected to Root.
pub struct Tool {
    router: Router,
    context: Arc<ToolContext>,
}

impl Tool {
    /// Start an unattached tool.
    pub fn start(name: impl Into<String>) -> Self {
        let context = Arc::new(ToolContext {
            name: name.into(),
            upstream: RwLock::new(None),
            heap: RwLock::new(None),
        });
        let router = Router::start(NodeRole::Tool, Arc::new(NodeHandler::new(context.clone())));
        Self { router, context }
    }

    /// Conversation router of this tool.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Talk to Root over `upstream`.
    pub fn attach(&self, upstream: ConnectionId) {
        *self.context.upstream.write() = Some(upstream);
    }

    fn root(&self) -> Result<ConnectionId, SpaceError> {
        self.context.upstream().ok_or_else(|| {
            ConversationError::Unreachable(format!("tool {} is not attached", self.context.name))
                .into()
        })
    }

    /// Send `request` to Root on a fresh activity.
    pub async fn call(&self, request: Request) -> Result<Response, SpaceError> {
        let root = self.root()?;
        self.router.begin().request(root, request).await
    }

    /// Status of Root.
    pub async fn ping_node(&self) -> Result<NodeStatus, SpaceError> {
        match self
            .call(Request::Ping {
                target: PingTarget::Node,
            })
            .await?
        {
            Response::Pong { status } => Ok(status),
            other => Err(unexpected("Pong", &other)),
        }
    }

    /// Every node of the cluster, Root first.
    pub async fn list_nodes(&self) -> Result<Vec<NodeStatus>, SpaceError> {
        match self.call(Request::ListNodes).await? {
            Response::Nodes { nodes } => Ok(nodes),
            other => Err(unexpected("Nodes", &other)),
        }
    }

    /// Select the project the cluster runs.
    pub async fn set_project(&self, path: impl Into<String>) -> Result<(), SpaceError> {
        let project = Project { path: path.into() };
        match self.call(Request::SetProject { project }).await? {
            Response::ProjectSet => Ok(()),
            other => Err(unexpected("ProjectSet", &other)),
        }
    }

    /// Current program, if a project is set.
    pub async fn program(&self) -> Result<Option<Program>, SpaceError> {
        match self.call(Request::GetProgram).await? {
            Response::Program { program } => Ok(program),
            other => Err(unexpected("Program", &other)),
        }
    }

    /// Take a process slot on `machine` and construct one owner in it.
    ///
    /// The returned owner is stepped by the caller through
    /// [`OwnerContext::begin_cycle`].
    pub async fn host_owner(&self, machine: MachineId) -> Result<OwnerContext, SpaceError> {
        let root = self.root()?;
        let mp = match self.call(Request::EnroleLeaf { machine }).await? {
            Response::LeafEnroled { mp } => mp,
            other => return Err(unexpected("LeafEnroled", &other)),
        };
        let heap = Arc::new(ProcessHeap::new(mp));
        *self.context.heap.write() = Some(heap.clone());
        let owner = OwnerContext::construct(&self.router, root, heap).await?;
        info!(name = %self.context.name, mpo = %owner.mpo(), "[ps-04] tool hosts owner");
        Ok(owner)
    }

    /// Stop the router.
    pub fn shutdown(&self) {
        self.router.shutdown();
    }
}
