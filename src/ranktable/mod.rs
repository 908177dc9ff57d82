//! Rank table: the published topology of one distributed job.
//!
//! A rank table maps every device of every pod in a job to a node, an IP
//! address and a rank ID. Workers build it incrementally from pod events and
//! publish it, split into bounded shards, through the job summary records.
//!
//! # Module Structure
//!
//! - [`instance`]: The device annotation a pod carries, and its validation
//! - [`table`]: [`RankTable`], the production [`RankTabler`]
//! - [`health`]: Unhealthy-rank aggregation by node and by device
//! - [`shard`]: Size-bounded splitting of a table into [`Shard`]s
//!
//! # Rank Assignment
//!
//! Rank IDs are dense per job: `rank = rank_index * devices_per_pod + offset`.
//! `rank_index` is a cursor owned by the worker and advanced once per cached pod.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Pod, PodUid};

pub mod health;
pub mod instance;
pub mod shard;
pub mod table;

pub use health::HealthTracker;
pub use instance::{
    DEVICE_ANNOTATION, DeviceEntry, DeviceInstance, MAX_DEVICES_PER_NODE, RANK_INDEX_ANNOTATION,
    explicit_rank_index,
};
pub use shard::{SHARD_DEVICE_THRESHOLD, Shard};
pub use table::{Device, RankTable, Server};

/// Errors that can occur while building a rank table.
#[derive(Debug, Error)]
pub enum RankTableError {
    /// The device annotation is not valid JSON for a [`DeviceInstance`].
    #[error("invalid device annotation on pod {pod}: {source}")]
    InvalidAnnotation {
        pod: String,
        #[source]
        source: serde_json::Error,
    },

    /// The node address is not an IP address.
    #[error("invalid server IP: {0}")]
    InvalidServerIp(String),

    /// The pod exposes no devices, or more than a node can hold.
    #[error("invalid device count {count} (expected 1..={max})")]
    InvalidDeviceCount { count: usize, max: usize },

    /// A device ID is not a non-negative integer.
    #[error("invalid device ID: {0}")]
    InvalidDeviceId(String),

    /// A device IP is not an IP address.
    #[error("invalid IP {ip} for device {device_id}")]
    InvalidDeviceIp { device_id: String, ip: String },

    /// The rank index is not a non-negative integer, or its ranks do not fit in a `usize`.
    #[error("invalid rank index {value:?} on pod {pod}")]
    InvalidRankIndex { pod: String, value: String },

    /// The pod is already in the table.
    #[error("pod {0} is already cached")]
    DuplicatePod(PodUid),

    /// The pod would be assigned a rank another pod already holds.
    #[error("rank {rank} for pod {pod} is already assigned")]
    DuplicateRank { pod: PodUid, rank: String },

    /// The pod is not in the table.
    #[error("pod {0} is not cached")]
    PodNotFound(PodUid),

    /// The table could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for rank table operations.
pub type Result<T> = std::result::Result<T, RankTableError>;

/// Construction status of a rank table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTableStatus {
    /// Still accepting pods.
    #[default]
    Initializing,
    /// Every expected pod is present; no further inserts are accepted.
    Complete,
}

impl fmt::Display for RankTableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankTableStatus::Initializing => write!(f, "initializing"),
            RankTableStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Rank table behavior as seen by a worker.
///
/// [`RankTable`] is the production implementation; tests substitute fakes to
/// exercise the worker without the table internals.
pub trait RankTabler: Send + fmt::Debug {
    /// Folds a pod's devices into the table and advances `rank_index`.
    ///
    /// Fails on invalid topology, or if the pod is already present. On failure
    /// the table and `rank_index` are unchanged.
    fn cache_pod_info(
        &mut self,
        pod: &Pod,
        instance: &DeviceInstance,
        rank_index: &mut usize,
    ) -> Result<()>;

    /// Removes the server built from the given pod.
    fn remove_pod_info(&mut self, namespace: &str, pod_id: &PodUid) -> Result<()>;

    fn status(&self) -> RankTableStatus;

    fn set_status(&mut self, status: RankTableStatus);

    /// Number of servers (cached pods with devices).
    fn server_count(&self) -> usize;

    /// Total number of devices across all servers.
    fn device_count(&self) -> usize;

    /// Marks every rank on `node` unhealthy, or clears the node's marks.
    fn set_job_node_healthy(&mut self, node: &str, healthy: bool);

    /// Replaces the set of unhealthy devices on `node`.
    fn set_job_device_healthy(
        &mut self,
        node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    );

    /// Returns overall health and the sorted, deduplicated unhealthy ranks.
    fn get_job_healthy(&self) -> (bool, Vec<String>);

    /// Serializes the table into shards of at most `threshold` devices each.
    fn hccl_json_slices(&self, threshold: usize) -> Result<Vec<Shard>>;
}
