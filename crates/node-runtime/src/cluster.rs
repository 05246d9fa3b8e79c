//! # Local Cluster
//!
//! A whole partition space inside one process, wired with in-memory links.
//!
//! ```text
//!                  Root ◄──── Tool
//!              ┌────┴────┐
//!           Daemon     Daemon          one per machine
//!           ┌──┴──┐    ┌──┴──┐
//!         Leaf  Leaf  Leaf  Leaf       one per process slot
//!          │     │     │     │
//!         Exec  Exec  Exec  Exec       owners run here
//! ```
//!
//! Enrolment happens in `start`, so every leaf already has its process slot
//! when the cluster is returned.

use ps_01_address_table::{InMemorySnapshotStore, SnapshotStore};
use ps_04_node_roles::{
    DaemonNode, Executor, ExecutorError, LeafNode, NodeContext, NodeHandler, OwnerProgram, RootNode,
    Tool,
};
use shared_conversation::{memory, Router};
use shared_types::{ConversationError, MachineId, NodeRole, SpaceError, MP, MPO};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shape of a local cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Daemons, one per machine.
    pub machines: usize,
    /// Leaves under each daemon.
    pub leaves_per_machine: usize,
    /// Tick interval of every executor.
    pub tick: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            machines: 1,
            leaves_per_machine: 1,
            tick: Duration::from_millis(1),
        }
    }
}

/// A daemon and its router.
pub struct MachineNode {
    node: Arc<DaemonNode>,
    router: Router,
    machine: MachineId,
}

impl MachineNode {
    /// Machine id.
    pub fn machine(&self) -> MachineId {
        self.machine
    }

    /// Daemon context.
    pub fn node(&self) -> &Arc<DaemonNode> {
        &self.node
    }
}

/// A leaf with the executor of its process.
pub struct LeafProcess {
    node: Arc<LeafNode>,
    router: Router,
    executor: Executor,
    mp: MP,
}

impl LeafProcess {
    /// Process slot.
    pub fn mp(&self) -> MP {
        self.mp
    }

    /// Leaf context.
    pub fn node(&self) -> &Arc<LeafNode> {
        &self.node
    }

    /// Executor of this process.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

/// In-process cluster.
pub struct LocalCluster {
    root: Arc<RootNode>,
    root_router: Router,
    machines: Vec<MachineNode>,
    leaves: Vec<LeafProcess>,
    tool: Tool,
}

impl LocalCluster {
    /// Cluster backed by an in-memory snapshot store.
    pub async fn start(config: ClusterConfig) -> Result<Self, SpaceError> {
        Self::with_store(config, Arc::new(InMemorySnapshotStore::new())).await
    }

    /// Cluster whose Root uses `store`.
    pub async fn with_store(
        config: ClusterConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, SpaceError> {
        let root = Arc::new(RootNode::new("root", store));
        let root_router = Router::start(NodeRole::Root, Arc::new(NodeHandler::new(root.clone())));

        let mut machines = Vec::with_capacity(config.machines);
        let mut leaves = Vec::with_capacity(config.machines * config.leaves_per_machine);
        for m in 0..config.machines {
            let daemon = Arc::new(DaemonNode::new(format!("daemon-{m}")));
            let daemon_router =
                Router::start(NodeRole::Daemon, Arc::new(NodeHandler::new(daemon.clone())));
            let (_, to_root) = memory::link(&root_router, &daemon_router);
            let machine = daemon.enrole(&daemon_router, to_root).await?;

            for l in 0..config.leaves_per_machine {
                leaves.push(Self::start_leaf(&daemon_router, m, l, config.tick).await?);
            }
            machines.push(MachineNode {
                node: daemon,
                router: daemon_router,
                machine,
            });
        }

        let tool = Tool::start("tool");
        let (_, to_root) = memory::link(&root_router, tool.router());
        tool.attach(to_root);

        info!(
            machines = machines.len(),
            leaves = leaves.len(),
            "[node] local cluster ready"
        );
        Ok(Self {
            root,
            root_router,
            machines,
            leaves,
            tool,
        })
    }

    async fn start_leaf(
        daemon_router: &Router,
        machine: usize,
        index: usize,
        tick: Duration,
    ) -> Result<LeafProcess, SpaceError> {
        let leaf = Arc::new(LeafNode::new(format!("leaf-{machine}.{index}")));
        let leaf_router = Router::start(NodeRole::Leaf, Arc::new(NodeHandler::new(leaf.clone())));
        let (_, to_daemon) = memory::link(daemon_router, &leaf_router);
        let mp = leaf.enrole(&leaf_router, to_daemon).await?;

        let executor = Executor::start(format!("executor-{machine}.{index}"), mp, tick);
        let (to_executor, to_leaf) = memory::link(&leaf_router, executor.router());
        leaf.attach_executor(to_executor);
        executor.attach(to_leaf);

        Ok(LeafProcess {
            node: leaf,
            router: leaf_router,
            executor,
            mp,
        })
    }

    /// Root context.
    pub fn root(&self) -> &Arc<RootNode> {
        &self.root
    }

    /// Root router.
    pub fn root_router(&self) -> &Router {
        &self.root_router
    }

    /// Daemons in start order.
    pub fn machines(&self) -> &[MachineNode] {
        &self.machines
    }

    /// Leaves in start order.
    pub fn leaves(&self) -> &[LeafProcess] {
        &self.leaves
    }

    /// Tool attached to Root.
    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Run `program` on a new owner in the process of leaf `leaf`.
    pub async fn spawn_owner(
        &self,
        leaf: usize,
        program: Box<dyn OwnerProgram>,
    ) -> Result<MPO, ExecutorError> {
        let process = self.leaves.get(leaf).ok_or_else(|| {
            SpaceError::from(ConversationError::Unreachable(format!("no leaf {leaf}")))
        })?;
        process.executor.spawn_owner(program).await
    }

    /// Wait for an owner started with [`spawn_owner`](Self::spawn_owner).
    pub async fn join(&self, mpo: MPO) -> Result<(), ExecutorError> {
        let process = self
            .leaves
            .iter()
            .find(|process| process.mp == mpo.mp())
            .ok_or(ExecutorError::UnknownOwner(mpo))?;
        process.executor.join(mpo).await
    }

    /// Cut the link between a leaf and its daemon.
    pub fn disconnect_leaf(&self, leaf: usize) {
        if let Some(upstream) = self.leaves.get(leaf).and_then(|p| p.node.upstream()) {
            self.leaves[leaf].router.disconnect(upstream);
        }
    }

    /// Stop every node.
    pub fn shutdown(&self) {
        self.tool.shutdown();
        for process in &self.leaves {
            process.executor.shutdown();
            process.router.shutdown();
        }
        for machine in &self.machines {
            machine.router.shutdown();
        }
        self.root_router.shutdown();
        info!("[node] local cluster stopped");
    }
}
