//! The production rank table.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::health::HealthTracker;
use super::instance::DeviceInstance;
use super::shard::{self, Shard};
use super::{RankTableError, RankTableStatus, RankTabler, Result};
use crate::types::{Pod, PodUid};

/// Rank table format version.
pub const RANK_TABLE_VERSION: &str = "1.0";

/// One device and the rank assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_ip: String,
    pub rank_id: String,
}

impl Device {
    pub fn rank(&self) -> Option<u64> {
        self.rank_id.parse().ok()
    }
}

/// The devices contributed by one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// IP address of the node.
    pub server_id: String,
    /// Name of the node.
    pub server_name: String,
    /// UID of the pod the devices were allocated to.
    pub pod_id: PodUid,
    #[serde(skip)]
    pub namespace: String,
    pub device: Vec<Device>,
}

impl Server {
    /// Rank of the first device, used as the server's sort key.
    ///
    /// Servers are never built without devices; a malformed rank sorts last.
    pub fn first_rank(&self) -> u64 {
        self.device
            .first()
            .and_then(Device::rank)
            .unwrap_or(u64::MAX)
    }
}

/// In-memory topology of one job.
///
/// INVARIANT: every server's `pod_id` is unique, every server has between 1 and
/// `MAX_DEVICES_PER_NODE` devices, and no rank ID appears twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTable {
    pub status: RankTableStatus,
    pub server_list: Vec<Server>,
    pub server_count: String,
    pub version: String,
    #[serde(skip)]
    health: HealthTracker,
}

impl Default for RankTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RankTable {
    pub fn new() -> Self {
        RankTable {
            status: RankTableStatus::Initializing,
            server_list: Vec::new(),
            server_count: "0".to_string(),
            version: RANK_TABLE_VERSION.to_string(),
            health: HealthTracker::default(),
        }
    }

    /// Returns true if the given pod has a server in the table.
    pub fn contains_pod(&self, pod_id: &PodUid) -> bool {
        self.server_list.iter().any(|s| &s.pod_id == pod_id)
    }

    fn refresh_server_count(&mut self) {
        self.server_count = self.server_list.len().to_string();
    }
}

impl RankTabler for RankTable {
    fn cache_pod_info(
        &mut self,
        pod: &Pod,
        instance: &DeviceInstance,
        rank_index: &mut usize,
    ) -> Result<()> {
        instance.validate()?;

        if self.contains_pod(&pod.uid) {
            return Err(RankTableError::DuplicatePod(pod.uid.clone()));
        }

        let per_pod = instance.devices.len();
        let first_rank = rank_index
            .checked_mul(per_pod)
            .filter(|first| first.checked_add(per_pod).is_some())
            .ok_or_else(|| RankTableError::InvalidRankIndex {
                pod: pod.to_string(),
                value: rank_index.to_string(),
            })?;
        let device: Vec<Device> = instance
            .devices
            .iter()
            .enumerate()
            .map(|(offset, entry)| Device {
                device_id: entry.device_id.clone(),
                device_ip: entry.device_ip.clone(),
                rank_id: (first_rank + offset).to_string(),
            })
            .collect();

        let assigned: HashSet<&str> = self
            .server_list
            .iter()
            .flat_map(|s| s.device.iter().map(|d| d.rank_id.as_str()))
            .collect();
        if let Some(taken) = device.iter().find(|d| assigned.contains(d.rank_id.as_str())) {
            return Err(RankTableError::DuplicateRank {
                pod: pod.uid.clone(),
                rank: taken.rank_id.clone(),
            });
        }

        self.server_list.push(Server {
            server_id: instance.server_id.clone(),
            server_name: pod.node_name.clone().unwrap_or_default(),
            pod_id: pod.uid.clone(),
            namespace: pod.namespace.clone(),
            device,
        });
        self.server_list.sort_by_key(Server::first_rank);
        self.refresh_server_count();
        *rank_index += 1;
        Ok(())
    }

    fn remove_pod_info(&mut self, namespace: &str, pod_id: &PodUid) -> Result<()> {
        let position = self
            .server_list
            .iter()
            .position(|s| s.namespace == namespace && &s.pod_id == pod_id)
            .ok_or_else(|| RankTableError::PodNotFound(pod_id.clone()))?;

        // Order is restored by the next insert's sort.
        self.server_list.swap_remove(position);
        self.refresh_server_count();
        Ok(())
    }

    fn status(&self) -> RankTableStatus {
        self.status
    }

    fn set_status(&mut self, status: RankTableStatus) {
        self.status = status;
    }

    fn server_count(&self) -> usize {
        self.server_list.len()
    }

    fn device_count(&self) -> usize {
        self.server_list.iter().map(|s| s.device.len()).sum()
    }

    fn set_job_node_healthy(&mut self, node: &str, healthy: bool) {
        self.health.set_node_healthy(&self.server_list, node, healthy);
    }

    fn set_job_device_healthy(
        &mut self,
        node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    ) {
        self.health
            .set_device_healthy(&self.server_list, node, unhealthy, network_unhealthy);
    }

    fn get_job_healthy(&self) -> (bool, Vec<String>) {
        let ranks = self.health.unhealthy_ranks();
        (ranks.is_empty(), ranks)
    }

    fn hccl_json_slices(&self, threshold: usize) -> Result<Vec<Shard>> {
        shard::slice(self, threshold)
    }
}
