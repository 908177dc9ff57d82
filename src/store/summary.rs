//! The job summary record: the published form of a job's rank table.
//!
//! Each job owns one or more records. Record 0 keeps the base name
//! `rings-config-<job>`; record `i > 0` is named `<base>-<i>`. Consumers read
//! record 0 for the topology and the shard total, and the rest only when they
//! need the full device map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::JobUid;

/// Label marking a record as belonging to an accelerator family.
pub const ACCELERATOR_LABEL: &str = "ring-controller.atlas";

/// Name prefix of every job summary record.
pub const SUMMARY_NAME_PREFIX: &str = "rings-config-";

/// Job status as published to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Failed,
    Complete,
    DeletePending,
}

impl JobStatus {
    /// Returns true for statuses that a pod failure must not overwrite.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::DeletePending => write!(f, "delete-pending"),
        }
    }
}

/// Whether the record is live or marked for garbage collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[default]
    Add,
    Delete,
}

/// One shard of a job's published rank table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub job_name: String,
    pub job_uid: JobUid,
    /// Rank-table JSON for this shard.
    pub hccl_json: String,
    /// Lowercase hex SHA-256 of `hccl_json`.
    pub checksum: String,
    pub shard_index: usize,
    pub shard_total: usize,
    pub job_status: JobStatus,
    pub operator: Operator,
    /// Unix seconds at which the record was marked for deletion, 0 while live.
    pub delete_time: i64,
    pub framework: String,
    pub add_time: i64,
    pub update_time: i64,
}

impl JobSummary {
    /// Creates shard 0 of a fresh job summary.
    pub fn new(
        namespace: impl Into<String>,
        job_name: impl Into<String>,
        job_uid: JobUid,
        family: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let job_name = job_name.into();
        let mut summary = JobSummary {
            namespace: namespace.into(),
            name: base_name(&job_name),
            labels: BTreeMap::from([(ACCELERATOR_LABEL.to_string(), family.to_string())]),
            job_name,
            job_uid,
            hccl_json: String::new(),
            checksum: String::new(),
            shard_index: 0,
            shard_total: 1,
            job_status: JobStatus::Pending,
            operator: Operator::Add,
            delete_time: 0,
            framework: String::new(),
            add_time: now.timestamp(),
            update_time: now.timestamp(),
        };
        summary.set_payload(String::new());
        summary
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    /// Replaces the rank-table payload and its checksum.
    pub fn set_payload(&mut self, payload: String) {
        self.checksum = checksum(&payload);
        self.hccl_json = payload;
    }

    /// The accelerator family this record is labelled with, if any.
    pub fn family(&self) -> Option<&str> {
        self.labels.get(ACCELERATOR_LABEL).map(String::as_str)
    }

    /// Derives the record for shard `index` of `total` from this one.
    pub fn for_shard(&self, index: usize, total: usize) -> Self {
        JobSummary {
            name: shard_name(&base_name(&self.job_name), index),
            shard_index: index,
            shard_total: total,
            ..self.clone()
        }
    }

    /// Marks the record for deletion at `now`.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.operator = Operator::Delete;
        self.job_status = JobStatus::DeletePending;
        self.delete_time = now.timestamp();
        self.update_time = now.timestamp();
    }

    /// Returns true if the record was marked for deletion more than `retention` ago.
    pub fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        self.operator == Operator::Delete
            && self.delete_time > 0
            && now.timestamp() - self.delete_time > retention.num_seconds()
    }
}

/// Name of shard 0 for the given job.
pub fn base_name(job_name: &str) -> String {
    format!("{SUMMARY_NAME_PREFIX}{job_name}")
}

/// Name of shard `index` given the base name.
pub fn shard_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}-{index}")
    }
}

/// Lowercase hex SHA-256 of a payload.
pub fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2024-01-15T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn new_summary_is_pending_shard_zero() {
        let summary = JobSummary::new("default", "train", JobUid::new("u1"), "ascend-910", now());
        assert_eq!(summary.name, "rings-config-train");
        assert_eq!(summary.shard_index, 0);
        assert_eq!(summary.shard_total, 1);
        assert_eq!(summary.job_status, JobStatus::Pending);
        assert_eq!(summary.operator, Operator::Add);
        assert_eq!(summary.delete_time, 0);
        assert_eq!(summary.family(), Some("ascend-910"));
        assert_eq!(summary.checksum, checksum(""));
    }

    #[test]
    fn shard_names() {
        assert_eq!(shard_name("rings-config-train", 0), "rings-config-train");
        assert_eq!(shard_name("rings-config-train", 3), "rings-config-train-3");

        let summary = JobSummary::new("default", "train", JobUid::new("u1"), "ascend-910", now());
        let shard = summary.for_shard(2, 4);
        assert_eq!(shard.name, "rings-config-train-2");
        assert_eq!(shard.shard_total, 4);
        assert_eq!(shard.labels, summary.labels);
    }

    #[test]
    fn checksum_tracks_payload() {
        let mut summary =
            JobSummary::new("default", "train", JobUid::new("u1"), "ascend-910", now());
        summary.set_payload("{}".to_string());
        assert_eq!(
            summary.checksum,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn expiry_requires_delete_marker_and_age() {
        let mut summary =
            JobSummary::new("default", "train", JobUid::new("u1"), "ascend-910", now());
        let retention = Duration::seconds(300);
        assert!(!summary.is_expired(retention, now() + Duration::days(1)));

        summary.mark_deleted(now());
        assert_eq!(summary.job_status, JobStatus::DeletePending);
        assert!(!summary.is_expired(retention, now() + Duration::seconds(300)));
        assert!(summary.is_expired(retention, now() + Duration::seconds(301)));
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(
            serde_json::to_string(&JobStatus::DeletePending).unwrap(),
            "\"delete-pending\""
        );
        assert_eq!(serde_json::to_string(&Operator::Delete).unwrap(), "\"delete\"");
        assert_eq!(JobStatus::DeletePending.to_string(), "delete-pending");
    }
}
