//! Job-group payload as delivered by the event source.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobIdentity, JobKey, JobUid};

/// Label carrying the training framework of a job.
pub const FRAMEWORK_LABEL: &str = "framework";

/// A job-group: the pod set of one distributed job and its expected size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobGroup {
    pub namespace: String,
    /// Name of the job that owns the pods.
    pub name: String,
    /// UID of the job that owns the pods.
    pub uid: JobUid,
    /// UID of the pod group object itself.
    pub group_uid: String,
    pub kind: String,
    /// Expected number of pods.
    pub replicas: u32,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl JobGroup {
    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            group_uid: self.group_uid.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.namespace, &self.name)
    }

    /// The framework tag, empty when the job does not declare one.
    pub fn framework(&self) -> &str {
        self.labels
            .get(FRAMEWORK_LABEL)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl fmt::Display for JobGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
