//! # Node Configuration
//!
//! One process runs one node role. Defaults suit a single-machine cluster on
//! loopback; every field that differs between processes can be overridden
//! from the environment.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PS_ROLE` | `role` |
//! | `PS_ROOT_ADDR` | `network.root_addr` |
//! | `PS_DAEMON_ADDR` | `network.daemon_addr` |
//! | `PS_LISTEN_ADDR` | `network.listen_addr` |
//! | `PS_STASH_DIR` | `storage.stash_dir` |
//! | `PS_TICK_MS` | `clock.tick_ms` |
//! | `PS_LOG` | `logging.level` |

use shared_conversation::DEFAULT_MAX_FRAME;
use shared_types::NodeRole;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default Root listening address.
pub const DEFAULT_ROOT_ADDR: &str = "127.0.0.1:7400";

/// Default daemon listening address.
pub const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:7401";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("{variable}='{value}' is invalid: {reason}")]
    InvalidVariable {
        /// Variable name.
        variable: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// The role cannot be started as a process.
    #[error("role '{0}' does not run as a standalone process")]
    UnsupportedRole(NodeRole),

    /// A setting is out of range.
    #[error("{field} {reason}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Role this process runs.
    pub role: NodeRole,
    /// Node name in status reports.
    pub name: String,
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Clock configuration.
    pub clock: ClockConfig,
    /// Executor configuration.
    pub executor: ExecutorConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Root,
            name: "root".to_string(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            clock: ClockConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Root address daemons and tools connect to.
    pub root_addr: SocketAddr,
    /// Daemon address leaves connect to.
    pub daemon_addr: SocketAddr,
    /// Address this node listens on. Unset for leaves and tools.
    pub listen_addr: Option<SocketAddr>,
    /// Largest frame accepted on a connection, in bytes.
    pub max_frame: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            root_addr: SocketAddr::from(([127, 0, 0, 1], 7400)),
            daemon_addr: SocketAddr::from(([127, 0, 0, 1], 7401)),
            listen_addr: None,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

/// Storage configuration, used by Root.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory of stashed files.
    pub stash_dir: PathBuf,
    /// Directory snapshot paths are relative to.
    pub snapshot_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stash_dir: PathBuf::from("./data/stash"),
            snapshot_dir: PathBuf::from("./data/snapshots"),
        }
    }
}

/// Clock configuration, used by executors.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Minimum time between two ticks, in milliseconds.
    pub tick_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { tick_ms: 16 }
    }
}

impl ClockConfig {
    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Executor configuration, used by leaves.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Heartbeat owners started with the leaf.
    pub heartbeat_owners: usize,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `ps_04_node_roles=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PS_ROLE") {
            self.role = parse("PS_ROLE", &value)?;
            self.name = self.role.name().to_string();
        }
        if let Some(value) = lookup("PS_ROOT_ADDR") {
            self.network.root_addr = parse("PS_ROOT_ADDR", &value)?;
        }
        if let Some(value) = lookup("PS_DAEMON_ADDR") {
            self.network.daemon_addr = parse("PS_DAEMON_ADDR", &value)?;
        }
        if let Some(value) = lookup("PS_LISTEN_ADDR") {
            self.network.listen_addr = Some(parse("PS_LISTEN_ADDR", &value)?);
        }
        if let Some(value) = lookup("PS_STASH_DIR") {
            self.storage.stash_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("PS_TICK_MS") {
            self.clock.tick_ms = parse("PS_TICK_MS", &value)?;
        }
        if let Some(value) = lookup("PS_LOG") {
            self.logging.level = value;
        }
        Ok(())
    }

    /// Address this node listens on, falling back to the role's default.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        match (self.network.listen_addr, self.role) {
            (Some(addr), _) => Some(addr),
            (None, NodeRole::Root) => Some(self.network.root_addr),
            (None, NodeRole::Daemon) => Some(self.network.daemon_addr),
            (None, _) => None,
        }
    }

    /// Check the configuration before starting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role == NodeRole::Executor {
            // Executors live inside leaf processes.
            return Err(ConfigError::UnsupportedRole(self.role));
        }
        if self.clock.tick_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "clock.tick_ms",
                reason: "must be at least 1",
            });
        }
        if self.network.max_frame < 1024 {
            return Err(ConfigError::OutOfRange {
                field: "network.max_frame",
                reason: "must be at least 1024 bytes",
            });
        }
        if self.role == NodeRole::Daemon && self.listen_addr() == Some(self.network.root_addr) {
            return Err(ConfigError::OutOfRange {
                field: "network.listen_addr",
                reason: "must differ from the root address",
            });
        }
        Ok(())
    }
}

fn parse<T>(variable: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidVariable {
            variable,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
