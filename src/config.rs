//! Process configuration
//!
//! Every setting is a CLI flag with an environment variable fallback, so the
//! same binary runs from a shell or from a Deployment's `env:` block.

use std::time::Duration;

use clap::Args;

use crate::retry::RetryConfig;
use crate::sync::DEFAULT_SYNC_ATTEMPTS;
use crate::DEFAULT_HEALTH_PORT;

/// Operator settings
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch for TykRoutes (all namespaces when unset)
    #[arg(long = "namespace", env = "OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Port for the health endpoint
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    /// Seconds between periodic reconciles of each route
    #[arg(
        long = "resync-secs",
        env = "RESYNC_INTERVAL_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_secs: u64,

    /// Compare-and-swap attempts per document write
    #[arg(
        long = "sync-attempts",
        env = "SYNC_MAX_ATTEMPTS",
        default_value_t = DEFAULT_SYNC_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub sync_attempts: u32,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl OperatorConfig {
    /// Namespace to watch, or `None` for cluster-wide
    pub fn watch_namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Periodic resync interval
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Retry policy for document writes
    pub fn sync_retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.sync_attempts)
    }
}
