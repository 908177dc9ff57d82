//! Pod payload as delivered by the event source.
//!
//! Only the fields the controller reads are modelled. Decoding happens once at
//! the collaborator boundary; nothing downstream inspects loosely-typed JSON.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobKey, JobUid, PodUid};

/// Reference from a pod to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: JobUid,
    #[serde(default)]
    pub controller: bool,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Returns true once the pod can no longer change phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// A container's resource limits, keyed by resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// A pod as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub uid: PodUid,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub phase: PodPhase,
}

impl Pod {
    /// The owner reference marked as controller, falling back to the first one.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|r| r.controller)
            .or_else(|| self.owner_references.first())
    }

    /// UID of the owning job, if the pod has an owner.
    pub fn owner_uid(&self) -> Option<&JobUid> {
        self.controller_owner().map(|r| &r.uid)
    }

    /// Namespaced name of the owning job, if the pod has an owner.
    ///
    /// Owner references are namespace-local, so the pod's namespace is used.
    pub fn owner_key(&self) -> Option<JobKey> {
        self.controller_owner()
            .map(|r| JobKey::new(&self.namespace, &r.name))
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Total number of `resource` units requested across all containers.
    ///
    /// Unparsable quantities count as zero.
    pub fn accelerator_count(&self, resource: &str) -> u32 {
        self.containers
            .iter()
            .filter_map(|c| c.limits.get(resource))
            .filter_map(|q| q.trim().parse::<u32>().ok())
            .sum()
    }

    pub fn requests_accelerator(&self, resource: &str) -> bool {
        self.accelerator_count(resource) > 0
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
