//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "PS_LOG";

/// Filter for `config`, with `PS_LOG` taking precedence.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter(config))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
