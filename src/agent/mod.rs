//! Event dispatch layer for routing cluster events to per-job workers.
//!
//! The agent owns the worker [`Registry`] and is the single entry point for
//! events coming from the event source:
//!
//! ```text
//!                       ┌──────────────┐
//!   pod events     ──►  │  do_work     │ ──► registry.route(pod) ──► worker.handle
//!                       └──────────────┘
//!                       ┌──────────────┐
//!   job-group events ─► │ job factory  │ ──► create summary, register / remove worker
//!                       └──────────────┘
//! ```
//!
//! Different jobs are handled concurrently. Events for one job serialize on
//! that job's worker lock.
//!
//! # Worker Lifecycle
//!
//! Workers are created by job-group add/update events and removed by
//! job-group delete events. Each worker runs a statistics task on a child of
//! the agent's root cancellation token, so [`Agent::shutdown_all`] stops every
//! one of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AgentConfig;
use crate::store::{ObjectStore, StoreError};
use crate::types::{ClusterEvent, JobUid};
use crate::worker::{ErrorKind, WorkerError, WorkerSnapshot};

mod cleanup;
mod dispatch;
mod factory;
mod registry;

pub use cleanup::sweep_deleted;
pub use dispatch::Dispatched;
pub use factory::JobOutcome;
pub use registry::{Registry, WorkerHandle};

/// Errors that can occur while handling a cluster event.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The worker rejected or failed the event.
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Store error while creating or tearing down a job.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A freshly written job summary did not become readable in time.
    #[error("record {namespace}/{name} not visible after {timeout:?}")]
    NotVisible {
        namespace: String,
        name: String,
        timeout: Duration,
    },

    /// The job summary lacks the accelerator-family label.
    #[error("record {namespace}/{name} is not labelled for family {family}")]
    MissingLabel {
        namespace: String,
        name: String,
        family: String,
    },
}

impl AgentError {
    /// Classifies the error the same way worker errors are classified.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Worker(e) => e.kind(),
            AgentError::NotVisible { .. } => ErrorKind::Race,
            AgentError::Store(_) | AgentError::MissingLabel { .. } => ErrorKind::Collaborator,
        }
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Routes cluster events to per-job workers.
pub struct Agent<S> {
    config: AgentConfig,
    store: Arc<S>,
    registry: Registry<S>,
    /// Root token; every worker task runs on a child of it.
    shutdown: CancellationToken,
}

impl<S: ObjectStore> Agent<S> {
    /// Creates an agent with no workers.
    pub fn new(config: AgentConfig, store: Arc<S>) -> Self {
        Self::new_with_shutdown(config, store, CancellationToken::new())
    }

    /// Creates an agent whose worker tasks stop when `shutdown` is cancelled.
    pub fn new_with_shutdown(
        config: AgentConfig,
        store: Arc<S>,
        shutdown: CancellationToken,
    ) -> Self {
        Agent {
            config,
            store,
            registry: Registry::new(),
            shutdown,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Handles one event from the event source.
    ///
    /// Errors are logged at a level matching their kind and then dropped;
    /// redelivery by the event source is the retry mechanism.
    #[instrument(skip_all, fields(event = event.event_type()))]
    pub async fn handle(&self, event: ClusterEvent) {
        let result = if let Some((kind, pod)) = event.as_pod_event() {
            self.do_work(kind, pod).await.map(|_| ())
        } else if let Some((kind, group)) = event.as_job_event() {
            self.handle_job_event(kind, group).await.map(|_| ())
        } else {
            Ok(())
        };

        if let Err(e) = result {
            log_error(&e);
        }
    }

    /// Stops every worker task and waits for them to exit.
    pub async fn shutdown_all(&self) {
        self.shutdown.cancel();
        let handles = self.registry.drain().await;
        let count = handles.len();
        for handle in handles {
            handle.stop_and_join().await;
        }
        info!(workers = count, "All workers stopped");
    }

    /// Marks a node healthy or faulty in every job's table.
    pub async fn report_node_health(&self, node: &str, healthy: bool) {
        for worker in self.registry.workers().await {
            worker.set_node_healthy(node, healthy).await;
        }
    }

    /// Reports the faulty devices of a node to every job's table.
    pub async fn report_device_health(
        &self,
        node: &str,
        unhealthy: &[String],
        network_unhealthy: &[String],
    ) {
        for worker in self.registry.workers().await {
            worker
                .set_device_healthy(node, unhealthy, network_unhealthy)
                .await;
        }
    }

    /// Snapshots of every worker, ordered by namespace and job name.
    pub async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots = Vec::new();
        for worker in self.registry.workers().await {
            snapshots.push(worker.snapshot().await);
        }
        snapshots.sort_by(|a, b| {
            (&a.identity.namespace, &a.identity.name, &a.identity.uid).cmp(&(
                &b.identity.namespace,
                &b.identity.name,
                &b.identity.uid,
            ))
        });
        snapshots
    }

    pub async fn snapshot(&self, uid: &JobUid) -> Option<WorkerSnapshot> {
        match self.registry.get(uid).await {
            Some(worker) => Some(worker.snapshot().await),
            None => None,
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn has_worker(&self, uid: &JobUid) -> bool {
        self.registry.contains(uid).await
    }

    /// Garbage-collects records whose retention window has passed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> std::result::Result<usize, StoreError> {
        sweep_deleted(self.store.as_ref(), self.config.retention(), now).await
    }
}

fn log_error(e: &AgentError) {
    if let AgentError::Worker(worker) = e
        && worker.is_duplicate()
    {
        debug!(error = %e, "Duplicate event");
        return;
    }
    match e.kind() {
        ErrorKind::Race | ErrorKind::Terminal => debug!(error = %e, "Event not applied"),
        ErrorKind::Validation => warn!(error = %e, "Event rejected"),
        ErrorKind::Collaborator => error!(error = %e, "Event failed"),
    }
}
