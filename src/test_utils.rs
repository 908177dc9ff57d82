//! Shared test utilities: object builders, a fake rank table, and arbitrary
//! generators for property-based testing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::ranktable::{
    DEVICE_ANNOTATION, DeviceEntry, DeviceInstance, MAX_DEVICES_PER_NODE, RankTableError,
    RankTableStatus, RankTabler, Shard,
};
use crate::types::{Container, JobGroup, JobUid, OwnerReference, Pod, PodPhase, PodUid};

/// Accelerator resource name used by every builder.
pub const TEST_RESOURCE: &str = "huawei.com/Ascend910";

/// Creation time of pods built by [`PodBuilder`].
pub fn pod_created() -> DateTime<Utc> {
    "2024-01-15T12:00:00Z".parse().unwrap()
}

/// Creation time of job-groups built by [`JobGroupBuilder`]; earlier than any
/// default pod.
pub fn job_created() -> DateTime<Utc> {
    "2024-01-15T11:00:00Z".parse().unwrap()
}

/// A device instance on `node_ip` with `count` devices.
///
/// Device `i` gets ID `i` and IP `192.168.30.{30 + ip_offset + i}`.
pub fn device_instance(node_ip: &str, ip_offset: usize, count: usize) -> DeviceInstance {
    DeviceInstance {
        pod_name: String::new(),
        server_id: node_ip.to_string(),
        devices: (0..count)
            .map(|i| DeviceEntry {
                device_id: i.to_string(),
                device_ip: format!("192.168.30.{}", 30 + ip_offset + i),
            })
            .collect(),
    }
}

/// Builder for pods owned by a job named `job`.
pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(name: &str, owner_uid: &str) -> Self {
        PodBuilder {
            pod: Pod {
                namespace: "default".to_string(),
                name: name.to_string(),
                uid: PodUid::new(format!("uid-{name}")),
                creation_timestamp: pod_created(),
                owner_references: vec![OwnerReference {
                    kind: "Job".to_string(),
                    name: "job".to_string(),
                    uid: JobUid::new(owner_uid),
                    controller: true,
                }],
                annotations: BTreeMap::new(),
                node_name: None,
                containers: vec![Container {
                    name: "main".to_string(),
                    limits: BTreeMap::new(),
                }],
                phase: PodPhase::Pending,
            },
        }
    }

    /// Requests `n` accelerators on the main container.
    pub fn devices(mut self, n: usize) -> Self {
        self.pod.containers[0]
            .limits
            .insert(TEST_RESOURCE.to_string(), n.to_string());
        self
    }

    /// Writes the device annotation.
    pub fn instance(mut self, instance: &DeviceInstance) -> Self {
        let mut instance = instance.clone();
        instance.pod_name = self.pod.name.clone();
        self.pod.annotations.insert(
            DEVICE_ANNOTATION.to_string(),
            serde_json::to_string(&instance).unwrap(),
        );
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pod
            .annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn node(mut self, node: &str) -> Self {
        self.pod.node_name = Some(node.to_string());
        self
    }

    pub fn phase(mut self, phase: PodPhase) -> Self {
        self.pod.phase = phase;
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.pod.creation_timestamp = at;
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.pod.namespace = namespace.to_string();
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

/// A pod with `count` devices on node `node-{index}`, fully annotated.
pub fn ready_pod(index: usize, owner_uid: &str, count: usize) -> Pod {
    let node_ip = format!("10.0.0.{}", index + 1);
    PodBuilder::new(&format!("pod-{index}"), owner_uid)
        .devices(count)
        .node(&format!("node-{index}"))
        .instance(&device_instance(&node_ip, 0, count))
        .build()
}

/// Builder for job-groups in the `default` namespace.
pub struct JobGroupBuilder {
    group: JobGroup,
}

impl JobGroupBuilder {
    pub fn new(name: &str, uid: &str) -> Self {
        JobGroupBuilder {
            group: JobGroup {
                namespace: "default".to_string(),
                name: name.to_string(),
                uid: JobUid::new(uid),
                group_uid: format!("pg-{uid}"),
                kind: "Job".to_string(),
                replicas: 1,
                creation_timestamp: job_created(),
                labels: BTreeMap::new(),
            },
        }
    }

    pub fn replicas(mut self, replicas: u32) -> Self {
        self.group.replicas = replicas;
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.group.creation_timestamp = at;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.group
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> JobGroup {
        self.group
    }
}

/// Observable state of a [`FakeTable`].
#[derive(Debug, Default)]
pub struct FakeTableState {
    pub status: RankTableStatus,
    /// Cached pods, with the cursor value each was inserted at.
    pub pods: Vec<(String, PodUid, usize)>,
    pub devices: usize,
    /// Makes every `cache_pod_info` call fail validation.
    pub reject: bool,
    /// Number of shards `hccl_json_slices` produces.
    pub shards: usize,
    pub unhealthy: Vec<String>,
}

/// A [`RankTabler`] that records calls and shares its state with the test.
#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    state: Arc<Mutex<FakeTableState>>,
}

impl FakeTable {
    pub fn new() -> Self {
        let table = FakeTable::default();
        table.state().shards = 1;
        table
    }

    pub fn state(&self) -> MutexGuard<'_, FakeTableState> {
        self.state.lock().unwrap()
    }
}

impl RankTabler for FakeTable {
    fn cache_pod_info(
        &mut self,
        pod: &Pod,
        instance: &DeviceInstance,
        rank_index: &mut usize,
    ) -> Result<(), RankTableError> {
        let mut state = self.state();
        if state.reject {
            return Err(RankTableError::InvalidServerIp(instance.server_id.clone()));
        }
        if state.pods.iter().any(|(_, uid, _)| uid == &pod.uid) {
            return Err(RankTableError::DuplicatePod(pod.uid.clone()));
        }
        state
            .pods
            .push((pod.namespace.clone(), pod.uid.clone(), *rank_index));
        state.devices += instance.devices.len();
        *rank_index += 1;
        Ok(())
    }

    fn remove_pod_info(&mut self, namespace: &str, pod_id: &PodUid) -> Result<(), RankTableError> {
        let mut state = self.state();
        let position = state
            .pods
            .iter()
            .position(|(ns, uid, _)| ns == namespace && uid == pod_id)
            .ok_or_else(|| RankTableError::PodNotFound(pod_id.clone()))?;
        state.pods.remove(position);
        Ok(())
    }

    fn status(&self) -> RankTableStatus {
        self.state().status
    }

    fn set_status(&mut self, status: RankTableStatus) {
        self.state().status = status;
    }

    fn server_count(&self) -> usize {
        self.state().pods.len()
    }

    fn device_count(&self) -> usize {
        self.state().devices
    }

    fn set_job_node_healthy(&mut self, node: &str, healthy: bool) {
        let mut state = self.state();
        state.unhealthy.retain(|n| n != node);
        if !healthy {
            state.unhealthy.push(node.to_string());
        }
    }

    fn set_job_device_healthy(
        &mut self,
        _node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    ) {
        let mut state = self.state();
        state.unhealthy = unhealthy.iter().chain(network_unhealthy).cloned().collect();
    }

    fn get_job_healthy(&self) -> (bool, Vec<String>) {
        let state = self.state();
        (state.unhealthy.is_empty(), state.unhealthy.clone())
    }

    fn hccl_json_slices(&self, _threshold: usize) -> Result<Vec<Shard>, RankTableError> {
        let state = self.state();
        let total = state.shards.max(1);
        Ok((0..total)
            .map(|index| Shard {
                index,
                total,
                device_count: 0,
                payload: format!("{{\"status\":\"{}\",\"shard\":{index}}}", state.status),
            })
            .collect())
    }
}

pub fn arb_job_uid() -> impl Strategy<Value = JobUid> {
    "[a-f0-9]{8}-[a-f0-9]{4}".prop_map(JobUid)
}

pub fn arb_ipv4() -> impl Strategy<Value = String> {
    (1u8..=254, any::<u8>(), any::<u8>(), 1u8..=254)
        .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}"))
}

/// A device instance that passes validation.
pub fn arb_device_instance() -> impl Strategy<Value = DeviceInstance> {
    (
        arb_ipv4(),
        prop::collection::vec(arb_ipv4(), 1..=MAX_DEVICES_PER_NODE),
    )
        .prop_map(|(server_id, ips)| DeviceInstance {
            pod_name: "pod".to_string(),
            server_id,
            devices: ips
                .into_iter()
                .enumerate()
                .map(|(i, device_ip)| DeviceEntry {
                    device_id: i.to_string(),
                    device_ip,
                })
                .collect(),
        })
}

pub fn arb_pod_phase() -> impl Strategy<Value = PodPhase> {
    prop_oneof![
        Just(PodPhase::Pending),
        Just(PodPhase::Running),
        Just(PodPhase::Succeeded),
        Just(PodPhase::Failed),
        Just(PodPhase::Unknown),
    ]
}
