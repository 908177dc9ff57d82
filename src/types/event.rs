//! Cluster lifecycle events.
//!
//! The event source delivers these at-least-once, without ordering guarantees
//! across reconnects. Each variant carries the object's current state.

use serde::{Deserialize, Serialize};

use super::job::JobGroup;
use super::pod::Pod;

/// The kind of change a pod event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodEventKind {
    Add,
    Update,
    Delete,
}

impl PodEventKind {
    /// Returns true for events that may insert a pod into the rank table.
    pub fn is_upsert(&self) -> bool {
        matches!(self, PodEventKind::Add | PodEventKind::Update)
    }
}

impl std::fmt::Display for PodEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodEventKind::Add => write!(f, "add"),
            PodEventKind::Update => write!(f, "update"),
            PodEventKind::Delete => write!(f, "delete"),
        }
    }
}

/// The kind of change a job-group event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEventKind::Add => write!(f, "add"),
            JobEventKind::Update => write!(f, "update"),
            JobEventKind::Delete => write!(f, "delete"),
        }
    }
}

/// A lifecycle event for a pod or job-group.
///
/// Wire format: `{"type": "pod_add", "object": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "snake_case")]
pub enum ClusterEvent {
    PodAdd(Pod),
    PodUpdate(Pod),
    PodDelete(Pod),
    JobAdd(JobGroup),
    JobUpdate(JobGroup),
    JobDelete(JobGroup),
}

impl ClusterEvent {
    /// Splits a pod event into its kind and payload.
    pub fn as_pod_event(&self) -> Option<(PodEventKind, &Pod)> {
        match self {
            ClusterEvent::PodAdd(pod) => Some((PodEventKind::Add, pod)),
            ClusterEvent::PodUpdate(pod) => Some((PodEventKind::Update, pod)),
            ClusterEvent::PodDelete(pod) => Some((PodEventKind::Delete, pod)),
            _ => None,
        }
    }

    /// Splits a job-group event into its kind and payload.
    pub fn as_job_event(&self) -> Option<(JobEventKind, &JobGroup)> {
        match self {
            ClusterEvent::JobAdd(group) => Some((JobEventKind::Add, group)),
            ClusterEvent::JobUpdate(group) => Some((JobEventKind::Update, group)),
            ClusterEvent::JobDelete(group) => Some((JobEventKind::Delete, group)),
            _ => None,
        }
    }

    /// Returns a short name for the event type, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::PodAdd(_) => "pod_add",
            ClusterEvent::PodUpdate(_) => "pod_update",
            ClusterEvent::PodDelete(_) => "pod_delete",
            ClusterEvent::JobAdd(_) => "job_add",
            ClusterEvent::JobUpdate(_) => "job_update",
            ClusterEvent::JobDelete(_) => "job_delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JobGroupBuilder, PodBuilder};

    #[test]
    fn pod_event_splits_kind() {
        let pod = PodBuilder::new("p0", "job-uid").build();
        let event = ClusterEvent::PodDelete(pod.clone());
        assert_eq!(event.as_pod_event(), Some((PodEventKind::Delete, &pod)));
        assert_eq!(event.event_type(), "pod_delete");
    }

    #[test]
    fn job_event_is_not_pod_event() {
        let group = JobGroupBuilder::new("job", "job-uid").build();
        let event = ClusterEvent::JobAdd(group.clone());
        assert!(event.as_pod_event().is_none());
        assert_eq!(event.as_job_event(), Some((JobEventKind::Add, &group)));
    }

    #[test]
    fn wire_format_is_tagged() {
        let line = r#"{"type":"job_delete","object":{"namespace":"ns","name":"job","uid":"u1","groupUid":"g1","kind":"Job","replicas":2,"creationTimestamp":"2024-01-15T12:00:00Z"}}"#;
        let event: ClusterEvent = serde_json::from_str(line).unwrap();
        match event {
            ClusterEvent::JobDelete(group) => {
                assert_eq!(group.replicas, 2);
                assert_eq!(group.group_uid, "g1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn upsert_kinds() {
        assert!(PodEventKind::Add.is_upsert());
        assert!(PodEventKind::Update.is_upsert());
        assert!(!PodEventKind::Delete.is_upsert());
    }
}
