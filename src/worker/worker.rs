//! Per-job state machine that folds pod events into a rank table.
//!
//! # Event Protocol
//!
//! Every pod event runs a pre-check, then a handler:
//! 1. Generation check: the pod's owner UID must match this worker's job UID.
//!    A mismatched pod created before the worker belongs to a deleted
//!    generation of the job (stale); one created after it belongs to a
//!    generation whose worker does not exist yet (not initialized).
//! 2. Readiness check: a pod requesting accelerators must carry its device
//!    annotation before it can be cached.
//! 3. Handler: cache or remove the pod, then publish when the table
//!    completes or a cached pod goes away. A complete table accepts no
//!    further inserts; that check runs under the same lock as the insert.
//!
//! Nothing is retried here. Race conditions are reported to the caller and
//! resolved by redelivery; a failed publish leaves the in-memory table in its
//! new state so that the next event publishes it again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::ranktable::{
    DeviceInstance, RankTable, RankTableError, RankTableStatus, RankTabler,
    SHARD_DEVICE_THRESHOLD, explicit_rank_index,
};
use crate::store::{JobStatus, ObjectStore, StoreError};
use crate::types::{JobGroup, JobIdentity, JobUid, Pod, PodEventKind, PodPhase, PodUid};

use super::publish;

/// Default accelerator resource requested by training containers.
pub const DEFAULT_ACCELERATOR_RESOURCE: &str = "huawei.com/Ascend910";

/// Default accelerator family label value.
pub const DEFAULT_ACCELERATOR_FAMILY: &str = "ascend-910";

/// Classification of worker errors by how they get resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed topology or a duplicate insert. Permanent.
    Validation,
    /// Event ordering race. Resolved by redelivery.
    Race,
    /// The object store failed or returned something unexpected.
    Collaborator,
    /// The table is complete and immutable.
    Terminal,
}

impl ErrorKind {
    /// Returns true if a later delivery of the same event may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Race)
    }
}

/// Errors that can occur while handling a pod event.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The pod belongs to an older generation of the job.
    #[error("pod {pod} predates job {job} and is no longer relevant")]
    StalePod { pod: String, job: JobUid },

    /// The pod belongs to a generation of the job whose worker does not exist yet.
    #[error("worker for the owner of pod {pod} is not initialized")]
    NotInitialized { pod: String },

    /// The pod requests accelerators but has no device annotation yet.
    #[error("pod {pod} has no device annotation yet")]
    NotReady { pod: String },

    /// The table is complete.
    #[error("rank table is complete, rejecting pod {pod}")]
    TableComplete { pod: String },

    /// The rank table rejected the pod.
    #[error("rank table error: {0}")]
    RankTable(#[from] RankTableError),

    /// A job summary record could not be read or written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The job summary records now belong to another generation of the job.
    #[error("job summary of {job} is owned by job {owner}")]
    Superseded { job: JobUid, owner: JobUid },

    /// A job summary record lacks the expected accelerator-family label.
    #[error("record {namespace}/{name} is missing accelerator label {family:?}")]
    MissingLabel {
        namespace: String,
        name: String,
        family: String,
    },
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::StalePod { .. }
            | WorkerError::NotInitialized { .. }
            | WorkerError::NotReady { .. }
            | WorkerError::Superseded { .. } => ErrorKind::Race,
            WorkerError::TableComplete { .. } => ErrorKind::Terminal,
            WorkerError::RankTable(RankTableError::Serialization(_)) => ErrorKind::Collaborator,
            WorkerError::RankTable(_) => ErrorKind::Validation,
            WorkerError::Store(_) | WorkerError::MissingLabel { .. } => ErrorKind::Collaborator,
        }
    }

    /// Returns true if the pod was already cached.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WorkerError::RankTable(RankTableError::DuplicatePod(_)))
    }
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// What a successfully handled event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The pod was counted; the table is still initializing.
    Cached,
    /// The pod was counted and completed the table.
    Completed,
    /// A cached pod was removed.
    Removed,
    /// Nothing to do, e.g. a repeated accelerator-less pod or an unknown delete.
    Skipped,
}

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub identity: JobIdentity,

    /// Expected number of pods.
    pub replicas: u32,

    /// Creation time of the job-group this worker serves.
    pub created_at: DateTime<Utc>,

    /// Resource name pods use to request accelerators.
    pub accelerator_resource: String,

    /// Label value the job summary records must carry.
    pub accelerator_family: String,

    /// Maximum devices per published shard.
    pub shard_device_threshold: usize,
}

impl WorkerConfig {
    /// Creates a configuration for the given job-group with default settings.
    pub fn new(group: &JobGroup) -> Self {
        WorkerConfig {
            identity: group.identity(),
            replicas: group.replicas,
            created_at: group.creation_timestamp,
            accelerator_resource: DEFAULT_ACCELERATOR_RESOURCE.to_string(),
            accelerator_family: DEFAULT_ACCELERATOR_FAMILY.to_string(),
            shard_device_threshold: SHARD_DEVICE_THRESHOLD,
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

    pub fn with_shard_threshold(mut self, threshold: usize) -> Self {
        self.shard_device_threshold = threshold;
        self
    }
}

/// Point-in-time view of a worker, for logs and the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub identity: JobIdentity,
    pub cached_pods: u32,
    pub replicas: u32,
    pub table_status: RankTableStatus,
    pub job_status: JobStatus,
    pub server_count: usize,
    pub device_count: usize,
    pub healthy: bool,
    pub unhealthy_ranks: Vec<String>,
}

/// State guarded by the worker lock.
#[derive(Debug)]
struct WorkerState {
    table: Box<dyn RankTabler>,
    cached_pod_num: u32,
    rank_index: usize,
    job_status: JobStatus,
    /// Pods that have reported phase `Succeeded`.
    succeeded: HashSet<PodUid>,
}

/// Per-job state machine.
pub struct Worker<S> {
    config: WorkerConfig,
    store: Arc<S>,
    state: Mutex<WorkerState>,
    /// Accelerator-less pods already counted.
    no_chip: StdMutex<HashSet<PodUid>>,
}

impl<S: ObjectStore> Worker<S> {
    /// Creates a worker backed by a fresh [`RankTable`].
    pub fn new(config: WorkerConfig, store: Arc<S>) -> Self {
        Self::with_table(config, store, Box::new(RankTable::new()))
    }

    /// Creates a worker backed by the given table.
    pub fn with_table(config: WorkerConfig, store: Arc<S>, table: Box<dyn RankTabler>) -> Self {
        Worker {
            config,
            store,
            state: Mutex::new(WorkerState {
                table,
                cached_pod_num: 0,
                rank_index: 0,
                job_status: JobStatus::Pending,
                succeeded: HashSet::new(),
            }),
            no_chip: StdMutex::new(HashSet::new()),
        }
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.config.identity
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Handles one pod event.
    #[instrument(skip(self, pod), fields(job = %self.config.identity, pod = %pod, kind = %kind))]
    pub async fn handle(&self, kind: PodEventKind, pod: &Pod) -> Result<Outcome> {
        self.pre_check(kind, pod)?;
        match kind {
            PodEventKind::Add | PodEventKind::Update => self.handle_upsert(pod).await,
            PodEventKind::Delete => self.handle_delete(pod).await,
        }
    }

    fn pre_check(&self, kind: PodEventKind, pod: &Pod) -> Result<()> {
        self.check_generation(pod)?;

        if kind.is_upsert()
            && pod.requests_accelerator(&self.config.accelerator_resource)
            && DeviceInstance::from_pod(pod)?.is_none()
        {
            return Err(WorkerError::NotReady {
                pod: pod.to_string(),
            });
        }
        Ok(())
    }

    fn check_open(&self, state: &WorkerState, pod: &Pod) -> Result<()> {
        if state.table.status() == RankTableStatus::Complete {
            return Err(WorkerError::TableComplete {
                pod: pod.to_string(),
            });
        }
        Ok(())
    }

    fn check_generation(&self, pod: &Pod) -> Result<()> {
        if pod.owner_uid() == Some(&self.config.identity.uid) {
            return Ok(());
        }
        if pod.creation_timestamp < self.config.created_at {
            Err(WorkerError::StalePod {
                pod: pod.to_string(),
                job: self.config.identity.uid.clone(),
            })
        } else {
            Err(WorkerError::NotInitialized {
                pod: pod.to_string(),
            })
        }
    }

    async fn handle_upsert(&self, pod: &Pod) -> Result<Outcome> {
        if !pod.requests_accelerator(&self.config.accelerator_resource) {
            return self.cache_no_chip(pod).await;
        }

        let Some(instance) = DeviceInstance::from_pod(pod)? else {
            return Err(WorkerError::NotReady {
                pod: pod.to_string(),
            });
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.check_open(state, pod)?;
        match explicit_rank_index(pod)? {
            Some(explicit) => {
                // The scheduler's rank must not move the automatic cursor.
                let mut cursor = explicit;
                state.table.cache_pod_info(pod, &instance, &mut cursor)?;
            }
            None => {
                state
                    .table
                    .cache_pod_info(pod, &instance, &mut state.rank_index)?;
            }
        }
        state.cached_pod_num += 1;
        debug!(
            cached = state.cached_pod_num,
            replicas = self.config.replicas,
            "Cached pod"
        );

        self.complete_if_ready(state).await
    }

    async fn cache_no_chip(&self, pod: &Pod) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        self.check_open(&state, pod)?;
        let inserted = self
            .no_chip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pod.uid.clone());
        if !inserted {
            return Ok(Outcome::Skipped);
        }

        state.cached_pod_num += 1;
        debug!(cached = state.cached_pod_num, "Counted pod without accelerators");
        self.complete_if_ready(&mut state).await
    }

    async fn complete_if_ready(&self, state: &mut WorkerState) -> Result<Outcome> {
        if state.cached_pod_num != self.config.replicas {
            return Ok(Outcome::Cached);
        }

        state.table.set_status(RankTableStatus::Complete);
        if state.job_status == JobStatus::Pending {
            state.job_status = JobStatus::Running;
        }
        info!(
            servers = state.table.server_count(),
            devices = state.table.device_count(),
            "Rank table complete"
        );
        self.publish(state).await?;
        Ok(Outcome::Completed)
    }

    async fn handle_delete(&self, pod: &Pod) -> Result<Outcome> {
        let was_no_chip = self
            .no_chip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pod.uid);

        let mut state = self.state.lock().await;
        if !was_no_chip {
            match state.table.remove_pod_info(&pod.namespace, &pod.uid) {
                Ok(()) => {}
                Err(RankTableError::PodNotFound(_)) => {
                    debug!("Deleted pod was never cached");
                    return Ok(Outcome::Skipped);
                }
                Err(e) => return Err(e.into()),
            }
        }

        state.cached_pod_num = state.cached_pod_num.saturating_sub(1);
        state.succeeded.remove(&pod.uid);
        state.table.set_status(RankTableStatus::Initializing);
        if !state.job_status.is_success() {
            state.job_status = JobStatus::Failed;
        }
        info!(
            cached = state.cached_pod_num,
            job_status = %state.job_status,
            "Removed pod, rank table reset to initializing"
        );

        self.publish(&mut state).await?;
        Ok(Outcome::Removed)
    }

    /// Updates the job status from a pod's phase.
    ///
    /// A failed pod fails the job unless it already completed; the job
    /// completes once every replica has succeeded. Returns the new status if it
    /// changed, in which case it has been published.
    #[instrument(skip(self, pod), fields(job = %self.config.identity, pod = %pod))]
    pub async fn check_job_completion(&self, pod: &Pod) -> Result<Option<JobStatus>> {
        if pod.owner_uid() != Some(&self.config.identity.uid) {
            return Ok(None);
        }

        let mut state = self.state.lock().await;
        let next = match pod.phase {
            PodPhase::Failed if !state.job_status.is_success() => JobStatus::Failed,
            PodPhase::Succeeded => {
                state.succeeded.insert(pod.uid.clone());
                if state.succeeded.len() >= self.config.replicas as usize {
                    JobStatus::Complete
                } else {
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        };
        if next == state.job_status {
            return Ok(None);
        }

        info!(from = %state.job_status, to = %next, "Job status changed");
        state.job_status = next;
        self.publish(&mut state).await?;
        Ok(Some(next))
    }

    /// Publishes the current table and job status to the job summary records.
    async fn publish(&self, state: &mut WorkerState) -> Result<()> {
        let shards = state
            .table
            .hccl_json_slices(self.config.shard_device_threshold)?;
        let result = publish::write_shards(
            self.store.as_ref(),
            &self.config,
            &shards,
            state.job_status,
            Utc::now(),
        )
        .await;
        if let Err(e) = &result {
            warn!(error = %e, "Failed to publish rank table, will retry on next event");
        }
        result
    }

    pub async fn set_node_healthy(&self, node: &str, healthy: bool) {
        self.state
            .lock()
            .await
            .table
            .set_job_node_healthy(node, healthy);
    }

    pub async fn set_device_healthy(
        &self,
        node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    ) {
        self.state
            .lock()
            .await
            .table
            .set_job_device_healthy(node, unhealthy, network_unhealthy);
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.lock().await;
        let (healthy, unhealthy_ranks) = state.table.get_job_healthy();
        WorkerSnapshot {
            identity: self.config.identity.clone(),
            cached_pods: state.cached_pod_num,
            replicas: self.config.replicas,
            table_status: state.table.status(),
            job_status: state.job_status,
            server_count: state.table.server_count(),
            device_count: state.table.device_count(),
            healthy,
            unhealthy_ranks,
        }
    }
}
