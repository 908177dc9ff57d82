//! Newtype wrappers for cluster object identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., passing a
//! pod UID where the owning job's UID is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The UID of a job (the controller owner of a set of pods).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobUid(pub String);

impl JobUid {
    pub fn new(s: impl Into<String>) -> Self {
        JobUid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobUid {
    fn from(s: &str) -> Self {
        JobUid(s.to_string())
    }
}

/// The UID of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodUid(pub String);

impl PodUid {
    pub fn new(s: impl Into<String>) -> Self {
        PodUid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PodUid {
    fn from(s: &str) -> Self {
        PodUid(s.to_string())
    }
}

/// A namespaced object name (namespace/name format).
///
/// Jobs recreated under the same name share a `JobKey` but not a `JobUid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub namespace: String,
    pub name: String,
}

impl JobKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        JobKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The full identity of one generation of a job.
///
/// Immutable once a worker has been created for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub namespace: String,
    pub name: String,
    pub uid: JobUid,
    /// UID of the job-group (pod group) object scheduling this job.
    pub group_uid: String,
    /// The job's kind, e.g. `Job` or `VolcanoJob`.
    pub kind: String,
}

impl JobIdentity {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.uid)
    }
}
