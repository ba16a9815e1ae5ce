//! Engine configuration.
//!
//! Resolved once at startup into an explicit value; nothing in the engine
//! reads the environment after construction.

use std::time::Duration;

use crate::policy::{BreakerConfig, RetryConfig};

/// Tuning for the orchestrator and its policies.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Per-execution fan-out limit: ready nodes dispatched concurrently.
    pub max_node_parallelism: usize,
    /// How often a running node refreshes its claim heartbeat.
    pub heartbeat_interval: Duration,
    /// A running node whose heartbeat is older than this is presumed
    /// abandoned and re-claimable.
    pub heartbeat_timeout: Duration,
    /// Node execution timeout when the node spec does not set one.
    pub default_node_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    /// Database name for the sqlite store, when one is used.
    pub sqlite_db_name: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_parallelism: 8,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            default_node_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            sqlite_db_name: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with environment variables (`.env` honored):
    /// `FLOWLINE_MAX_PARALLELISM`, `FLOWLINE_HEARTBEAT_TIMEOUT_MS`,
    /// `FLOWLINE_NODE_TIMEOUT_MS`, `FLOWLINE_SQLITE_DB`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(value) = read_env_u64("FLOWLINE_MAX_PARALLELISM") {
            config.max_node_parallelism = (value as usize).max(1);
        }
        if let Some(value) = read_env_u64("FLOWLINE_HEARTBEAT_TIMEOUT_MS") {
            config.heartbeat_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_env_u64("FLOWLINE_NODE_TIMEOUT_MS") {
            config.default_node_timeout = Duration::from_millis(value);
        }
        if let Ok(name) = std::env::var("FLOWLINE_SQLITE_DB") {
            config.sqlite_db_name = Some(name);
        }
        config
    }

    #[must_use]
    pub fn with_max_node_parallelism(mut self, limit: usize) -> Self {
        self.max_node_parallelism = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_node_timeout(mut self, timeout: Duration) -> Self {
        self.default_node_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Heartbeat timeout in the chrono form the store claim takes.
    #[must_use]
    pub fn heartbeat_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

fn read_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|raw| match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%key, %raw, "ignoring unparseable engine config variable");
            None
        }
    })
}
