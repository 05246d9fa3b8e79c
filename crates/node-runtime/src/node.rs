//! # Node Processes
//!
//! Starts one role over TCP.
//!
//! ```text
//! root:    listen(root_addr)
//! daemon:  connect(root_addr) ─► EnroleDaemon ─► listen(daemon_addr)
//! leaf:    connect(daemon_addr) ─► EnroleLeaf ─► in-process executor
//! tool:    connect(root_addr) ─► ListNodes ─► exit
//! ```

use crate::config::{ConfigError, NodeConfig};
use crate::programs::Heartbeat;
use anyhow::{Context, Result};
use ps_01_address_table::FileSnapshotStore;
use ps_04_node_roles::{DaemonNode, Executor, LeafNode, NodeHandler, RootNode, Tool};
use shared_conversation::{memory, tcp, Router};
use shared_types::{MachineId, NodeRole, NodeStatus, MP, MPO};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A started node.
pub enum RunningNode {
    /// Root serving daemons and tools.
    Root {
        /// Root router.
        router: Router,
        /// Bound address.
        addr: SocketAddr,
        /// Accept loop.
        listener: JoinHandle<()>,
    },
    /// Daemon serving leaves.
    Daemon {
        /// Daemon router.
        router: Router,
        /// Machine assigned by Root.
        machine: MachineId,
        /// Bound address.
        addr: SocketAddr,
        /// Accept loop.
        listener: JoinHandle<()>,
    },
    /// Leaf with its executor.
    Leaf {
        /// Leaf router.
        router: Router,
        /// Process slot.
        mp: MP,
        /// Executor of the process.
        executor: Executor,
        /// Owners started from configuration.
        owners: Vec<MPO>,
    },
}

impl RunningNode {
    /// Role of this node.
    pub fn role(&self) -> NodeRole {
        match self {
            RunningNode::Root { .. } => NodeRole::Root,
            RunningNode::Daemon { .. } => NodeRole::Daemon,
            RunningNode::Leaf { .. } => NodeRole::Leaf,
        }
    }

    /// Listening address, if the role listens.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            RunningNode::Root { addr, .. } | RunningNode::Daemon { addr, .. } => Some(*addr),
            RunningNode::Leaf { .. } => None,
        }
    }

    /// Stop accepting, stop owners and close every connection.
    pub fn shutdown(&self) {
        match self {
            RunningNode::Root {
                router, listener, ..
            }
            | RunningNode::Daemon {
                router, listener, ..
            } => {
                listener.abort();
                router.shutdown();
            }
            RunningNode::Leaf {
                router, executor, ..
            } => {
                executor.shutdown();
                router.shutdown();
            }
        }
        info!(role = %self.role(), "[node] stopped");
    }
}

/// Start the role named by `config`. Tools are one-shot; see [`run_tool`].
pub async fn start_node(config: &NodeConfig) -> Result<RunningNode> {
    config.validate()?;
    let max_frame = config.network.max_frame;
    match config.role {
        NodeRole::Root => {
            let store = Arc::new(FileSnapshotStore::new(
                config.storage.stash_dir.clone(),
                config.storage.snapshot_dir.clone(),
            ));
            let root = Arc::new(RootNode::new(config.name.clone(), store));
            let router = Router::start(NodeRole::Root, Arc::new(NodeHandler::new(root)));
            let bind = listen_addr(config)?;
            let (addr, listener) = tcp::serve(router.clone(), bind, max_frame)
                .await
                .with_context(|| format!("root cannot listen on {bind}"))?;
            info!(%addr, "[node] root ready");
            Ok(RunningNode::Root {
                router,
                addr,
                listener,
            })
        }
        NodeRole::Daemon => {
            let daemon = Arc::new(DaemonNode::new(config.name.clone()));
            let router = Router::start(NodeRole::Daemon, Arc::new(NodeHandler::new(daemon.clone())));
            let root = tcp::connect(&router, config.network.root_addr, max_frame)
                .await
                .context("daemon cannot reach root")?;
            let machine = daemon.enrole(&router, root).await?;
            let bind = listen_addr(config)?;
            let (addr, listener) = tcp::serve(router.clone(), bind, max_frame)
                .await
                .with_context(|| format!("daemon cannot listen on {bind}"))?;
            info!(machine, %addr, "[node] daemon ready");
            Ok(RunningNode::Daemon {
                router,
                machine,
                addr,
                listener,
            })
        }
        NodeRole::Leaf => {
            let leaf = Arc::new(LeafNode::new(config.name.clone()));
            let router = Router::start(NodeRole::Leaf, Arc::new(NodeHandler::new(leaf.clone())));
            let daemon = tcp::connect(&router, config.network.daemon_addr, max_frame)
                .await
                .context("leaf cannot reach daemon")?;
            let mp = leaf.enrole(&router, daemon).await?;

            let executor = Executor::start(
                format!("{}-executor", config.name),
                mp,
                config.clock.interval(),
            );
            let (to_executor, to_leaf) = memory::link(&router, executor.router());
            leaf.attach_executor(to_executor);
            executor.attach(to_leaf);

            let mut owners = Vec::with_capacity(config.executor.heartbeat_owners);
            for _ in 0..config.executor.heartbeat_owners {
                owners.push(executor.spawn_owner(Box::new(Heartbeat::new())).await?);
            }
            info!(%mp, owners = owners.len(), "[node] leaf ready");
            Ok(RunningNode::Leaf {
                router,
                mp,
                executor,
                owners,
            })
        }
        role => Err(ConfigError::UnsupportedRole(role).into()),
    }
}

/// Connect a tool to Root and list every node of the cluster.
pub async fn run_tool(config: &NodeConfig) -> Result<Vec<NodeStatus>> {
    let tool = Tool::start(config.name.clone());
    let root = tcp::connect(tool.router(), config.network.root_addr, config.network.max_frame)
        .await
        .context("tool cannot reach root")?;
    tool.attach(root);
    let nodes = tool.list_nodes().await;
    tool.shutdown();
    Ok(nodes?)
}

fn listen_addr(config: &NodeConfig) -> Result<SocketAddr> {
    config
        .listen_addr()
        .with_context(|| format!("{} has no listen address", config.role))
}
