//! # Node Runtime Library
//!
//! Process-level wiring for partition-space nodes. The `node-runtime`
//! binary runs one role per process over TCP; [`LocalCluster`] runs a whole
//! cluster in one process over in-memory links.
//!
//! ## Module Structure
//!
//! ```text
//! node-runtime/
//! ├── config.rs      # NodeConfig, environment overrides, validation
//! ├── logging.rs     # tracing subscriber
//! ├── node.rs        # one role over TCP
//! ├── cluster.rs     # LocalCluster
//! └── programs.rs    # built-in owner programs
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod logging;
pub mod node;
pub mod programs;

pub use cluster::{ClusterConfig, LeafProcess, LocalCluster, MachineNode};
pub use config::{ConfigError, NodeConfig};
pub use logging::init_logging;
pub use node::{run_tool, start_node, RunningNode};
pub use programs::{Heartbeat, Poke};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
