//! # Partition-Space Node
//!
//! Runs one node role, chosen by `PS_ROLE`.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then environment)
//! 2. Install the tracing subscriber
//! 3. Validate the configuration
//! 4. Start the role (tools print the cluster and exit)
//! 5. Run until Ctrl+C, then shut down

use anyhow::{Context, Result};
use node_runtime::{init_logging, run_tool, start_node, NodeConfig, VERSION};
use shared_types::NodeRole;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("invalid environment")?;
    init_logging(&config.logging)?;
    config.validate()?;

    info!("===========================================");
    info!("  Partition-Space Node v{VERSION}");
    info!("  Role: {}", config.role);
    info!("===========================================");

    if config.role == NodeRole::Tool {
        let nodes = run_tool(&config).await?;
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    let node = start_node(&config).await?;
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    node.shutdown();
    Ok(())
}
