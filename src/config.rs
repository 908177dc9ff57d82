//! Controller configuration.
//!
//! Every setting has a default; a subset can be overridden through
//! `HCCL_CONTROLLER_*` environment variables. Absent, unparsable or zero values
//! fall back to the default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ranktable::SHARD_DEVICE_THRESHOLD;
use crate::worker::{DEFAULT_ACCELERATOR_FAMILY, DEFAULT_ACCELERATOR_RESOURCE};

/// Default interval between worker statistics reports (30 seconds).
const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// Default bound on waiting for a new job summary record to become visible.
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 10;

/// Default interval between visibility checks.
const DEFAULT_VISIBILITY_POLL_MILLIS: u64 = 200;

/// Default age after which deleted records are garbage-collected (5 minutes).
const DEFAULT_DELETE_RETENTION_SECS: u64 = 300;

/// Default interval between garbage-collection sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

const DEFAULT_STATE_DIR: &str = "./state";

const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Configuration for the agent and the binary around it.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Resource name pods use to request accelerators.
    ///
    /// Configure via `HCCL_CONTROLLER_RESOURCE`.
    pub accelerator_resource: String,

    /// Accelerator-family label value written to, and required on, every
    /// job summary record.
    ///
    /// Configure via `HCCL_CONTROLLER_FAMILY`.
    pub accelerator_family: String,

    /// Maximum devices per published shard.
    pub shard_device_threshold: usize,

    /// Interval between worker statistics reports.
    ///
    /// Configure via `HCCL_CONTROLLER_STATS_INTERVAL_SECS`.
    pub stats_interval: Duration,

    /// How long the job factory waits for a new record to become readable.
    ///
    /// Configure via `HCCL_CONTROLLER_VISIBILITY_TIMEOUT_SECS`.
    pub visibility_timeout: Duration,

    pub visibility_poll_interval: Duration,

    /// How long a record marked for deletion is kept.
    ///
    /// Configure via `HCCL_CONTROLLER_RETENTION_SECS`.
    pub delete_retention: Duration,

    pub sweep_interval: Duration,

    /// Root directory of the file-backed object store.
    ///
    /// Configure via `HCCL_CONTROLLER_STATE_DIR`.
    pub state_dir: PathBuf,

    /// Address of the HTTP server.
    ///
    /// Configure via `HCCL_CONTROLLER_LISTEN_ADDR`.
    pub listen_addr: SocketAddr,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        AgentConfig {
            accelerator_resource: DEFAULT_ACCELERATOR_RESOURCE.to_string(),
            accelerator_family: DEFAULT_ACCELERATOR_FAMILY.to_string(),
            shard_device_threshold: SHARD_DEVICE_THRESHOLD,
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            visibility_poll_interval: Duration::from_millis(DEFAULT_VISIBILITY_POLL_MILLIS),
            delete_retention: Duration::from_secs(DEFAULT_DELETE_RETENTION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
        }
    }

    /// Creates a configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        AgentConfig {
            accelerator_resource: lookup("HCCL_CONTROLLER_RESOURCE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.accelerator_resource.clone()),
            accelerator_family: lookup("HCCL_CONTROLLER_FAMILY")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.accelerator_family.clone()),
            stats_interval: secs("HCCL_CONTROLLER_STATS_INTERVAL_SECS", defaults.stats_interval),
            visibility_timeout: secs(
                "HCCL_CONTROLLER_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout,
            ),
            delete_retention: secs("HCCL_CONTROLLER_RETENTION_SECS", defaults.delete_retention),
            state_dir: lookup("HCCL_CONTROLLER_STATE_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir.clone()),
            listen_addr: lookup("HCCL_CONTROLLER_LISTEN_ADDR")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.listen_addr),
            ..defaults
        }
    }

    pub fn with_accelerator(
        mut self,
        resource: impl Into<String>,
        family: impl Into<String>,
    ) -> Self {
        self.accelerator_resource = resource.into();
        self.accelerator_family = family.into();
        self
    }

    pub fn with_visibility(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.visibility_timeout = timeout;
        self.visibility_poll_interval = poll_interval;
        self
    }

    pub fn with_shard_threshold(mut self, threshold: usize) -> Self {
        self.shard_device_threshold = threshold;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Retention as a calendar duration, for comparing against record timestamps.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.delete_retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DELETE_RETENTION_SECS as i64))
    }
}
