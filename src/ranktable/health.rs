//! Unhealthy-rank aggregation.
//!
//! Node-level and device-level faults are tracked independently, keyed by node
//! name, so a node recovering does not clear a device fault on it (or vice
//! versa). Job health is the union of both.

use std::collections::{BTreeMap, BTreeSet};

use super::table::Server;

/// Unhealthy ranks, by source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthTracker {
    node_faults: BTreeMap<String, BTreeSet<u64>>,
    device_faults: BTreeMap<String, BTreeSet<u64>>,
}

impl HealthTracker {
    /// Marks every rank hosted on `node` unhealthy, or clears them.
    ///
    /// Nodes the job has no servers on are ignored.
    pub fn set_node_healthy(&mut self, servers: &[Server], node: &str, healthy: bool) {
        if healthy {
            self.node_faults.remove(node);
            return;
        }

        let ranks: BTreeSet<u64> = servers
            .iter()
            .filter(|s| s.server_name == node)
            .flat_map(|s| s.device.iter().filter_map(|d| d.rank()))
            .collect();
        if ranks.is_empty() {
            self.node_faults.remove(node);
        } else {
            self.node_faults.insert(node.to_string(), ranks);
        }
    }

    /// Replaces the device faults recorded for `node`.
    ///
    /// Devices are named either by bare ID (`"3"`) or with a family prefix
    /// (`"Ascend910-3"`). Devices the job does not use on that node are ignored.
    pub fn set_device_healthy(
        &mut self,
        servers: &[Server],
        node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    ) {
        let faulty: BTreeSet<&str> = unhealthy
            .iter()
            .chain(network_unhealthy)
            .map(|name| device_id_of(name))
            .collect();

        let ranks: BTreeSet<u64> = servers
            .iter()
            .filter(|s| s.server_name == node)
            .flat_map(|s| s.device.iter())
            .filter(|d| faulty.contains(d.device_id.as_str()))
            .filter_map(|d| d.rank())
            .collect();

        if ranks.is_empty() {
            self.device_faults.remove(node);
        } else {
            self.device_faults.insert(node.to_string(), ranks);
        }
    }

    /// All unhealthy ranks, deduplicated and in ascending order.
    pub fn unhealthy_ranks(&self) -> Vec<String> {
        self.node_faults
            .values()
            .chain(self.device_faults.values())
            .flatten()
            .copied()
            .collect::<BTreeSet<u64>>()
            .into_iter()
            .map(|r| r.to_string())
            .collect()
    }
}

fn device_id_of(name: &str) -> &str {
    name.rsplit('-').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranktable::table::Device;
    use crate::types::PodUid;

    fn server(node: &str, first_rank: u64, devices: u64) -> Server {
        Server {
            server_id: "10.0.0.1".to_string(),
            server_name: node.to_string(),
            pod_id: PodUid::new(format!("pod-{node}")),
            namespace: "default".to_string(),
            device: (0..devices)
                .map(|i| Device {
                    device_id: i.to_string(),
                    device_ip: format!("192.168.30.{}", 30 + i),
                    rank_id: (first_rank + i).to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn healthy_by_default() {
        assert!(HealthTracker::default().unhealthy_ranks().is_empty());
    }

    #[test]
    fn node_fault_marks_all_ranks_on_node() {
        let servers = [server("a", 0, 2), server("b", 2, 2)];
        let mut health = HealthTracker::default();
        health.set_node_healthy(&servers, "b", false);
        assert_eq!(health.unhealthy_ranks(), ["2", "3"]);

        health.set_node_healthy(&servers, "b", true);
        assert!(health.unhealthy_ranks().is_empty());
    }

    #[test]
    fn unknown_node_is_ignored() {
        let servers = [server("a", 0, 2)];
        let mut health = HealthTracker::default();
        health.set_node_healthy(&servers, "elsewhere", false);
        assert!(health.unhealthy_ranks().is_empty());
    }

    #[test]
    fn device_faults_accept_prefixed_names() {
        let servers = [server("a", 0, 4)];
        let mut health = HealthTracker::default();
        health.set_device_healthy(
            &servers,
            "a",
            &["Ascend910-1".to_string()],
            &["3".to_string()],
        );
        assert_eq!(health.unhealthy_ranks(), ["1", "3"]);
    }

    #[test]
    fn device_report_replaces_previous_report() {
        let servers = [server("a", 0, 4)];
        let mut health = HealthTracker::default();
        health.set_device_healthy(&servers, "a", &["1".to_string()], &[]);
        health.set_device_healthy(&servers, "a", &[], &[]);
        assert!(health.unhealthy_ranks().is_empty());
    }

    #[test]
    fn union_is_deduplicated() {
        let servers = [server("a", 0, 2), server("b", 2, 2)];
        let mut health = HealthTracker::default();
        health.set_node_healthy(&servers, "a", false);
        health.set_device_healthy(&servers, "a", &["0".to_string()], &["0".to_string()]);
        health.set_device_healthy(&servers, "b", &["Ascend910-1".to_string()], &[]);
        assert_eq!(health.unhealthy_ranks(), ["0", "1", "3"]);

        // Clearing the node fault keeps the independent device fault.
        health.set_node_healthy(&servers, "a", true);
        assert_eq!(health.unhealthy_ranks(), ["0", "3"]);
    }
}
