//! One role per "process" over loopback TCP.

use node_runtime::{run_tool, start_node, NodeConfig, RunningNode};
use shared_types::NodeRole;
use std::net::SocketAddr;

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn config(role: NodeRole, dir: &tempfile::TempDir) -> NodeConfig {
    let mut config = NodeConfig {
        role,
        name: role.name().to_string(),
        ..NodeConfig::default()
    };
    config.network.listen_addr = Some(loopback());
    config.storage.stash_dir = dir.path().join("stash");
    config.storage.snapshot_dir = dir.path().join("snapshots");
    config.clock.tick_ms = 1;
    config
}

#[tokio::test]
async fn test_cluster_over_tcp() {
    let dir = tempfile::tempdir().unwrap();

    let root = start_node(&config(NodeRole::Root, &dir)).await.unwrap();
    let root_addr = root.local_addr().unwrap();

    let mut daemon_config = config(NodeRole::Daemon, &dir);
    daemon_config.network.root_addr = root_addr;
    let daemon = start_node(&daemon_config).await.unwrap();
    let RunningNode::Daemon { machine, .. } = &daemon else {
        panic!("expected a daemon");
    };
    assert_eq!(*machine, 0);

    let mut leaf_config = config(NodeRole::Leaf, &dir);
    leaf_config.network.listen_addr = None;
    leaf_config.network.daemon_addr = daemon.local_addr().unwrap();
    leaf_config.executor.heartbeat_owners = 2;
    let leaf = start_node(&leaf_config).await.unwrap();
    let RunningNode::Leaf { mp, owners, .. } = &leaf else {
        panic!("expected a leaf");
    };
    assert_eq!(mp.machine, 0);
    assert_eq!(owners.len(), 2);

    let mut tool_config = config(NodeRole::Tool, &dir);
    tool_config.network.root_addr = root_addr;
    let nodes = run_tool(&tool_config).await.unwrap();
    let roles: Vec<_> = nodes.iter().map(|n| n.role).collect();
    assert_eq!(
        roles,
        vec![
            NodeRole::Root,
            NodeRole::Daemon,
            NodeRole::Leaf,
            NodeRole::Executor
        ]
    );
    assert_eq!(nodes[3].owners, *owners);

    leaf.shutdown();
    daemon.shutdown();
    root.shutdown();
}

#[tokio::test]
async fn test_unreachable_root() {
    let dir = tempfile::tempdir().unwrap();
    let vacant = std::net::TcpListener::bind(loopback())
        .unwrap()
        .local_addr()
        .unwrap();

    let mut daemon_config = config(NodeRole::Daemon, &dir);
    daemon_config.network.root_addr = vacant;
    assert!(start_node(&daemon_config).await.is_err());
}

#[tokio::test]
async fn test_executor_role_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(start_node(&config(NodeRole::Executor, &dir)).await.is_err());
    assert!(start_node(&config(NodeRole::Tool, &dir)).await.is_err());
}
