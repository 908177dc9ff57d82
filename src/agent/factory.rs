//! Creating and tearing down workers from job-group events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

use crate::store::{JobSummary, ObjectStore, base_name, shard_name};
use crate::types::{JobEventKind, JobGroup};
use crate::worker::{Worker, WorkerConfig, run_stats};

use super::{Agent, AgentError, Result};

/// What a job-group event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// A worker was created and registered.
    Created,
    /// A worker already existed for the job UID.
    Exists,
    /// The job's worker was removed and its records marked for deletion.
    Deleted,
    /// The job had no worker; nothing to tear down.
    Absent,
}

impl<S: ObjectStore> Agent<S> {
    /// Handles one job-group event.
    #[instrument(skip(self, group), fields(job = %group, uid = %group.uid, kind = %kind))]
    pub async fn handle_job_event(
        &self,
        kind: JobEventKind,
        group: &JobGroup,
    ) -> Result<JobOutcome> {
        match kind {
            JobEventKind::Add | JobEventKind::Update => self.ensure_worker(group).await,
            JobEventKind::Delete => self.teardown_worker(group).await,
        }
    }

    async fn ensure_worker(&self, group: &JobGroup) -> Result<JobOutcome> {
        if self.registry.contains(&group.uid).await {
            trace!("Worker already exists");
            return Ok(JobOutcome::Exists);
        }

        self.init_summary(group, Utc::now()).await?;
        let record = self.wait_visible(group).await?;
        if record.family() != Some(self.config.accelerator_family.as_str()) {
            return Err(AgentError::MissingLabel {
                namespace: record.namespace,
                name: record.name,
                family: self.config.accelerator_family.clone(),
            });
        }

        let config = WorkerConfig::new(group)
            .with_accelerator(
                &self.config.accelerator_resource,
                &self.config.accelerator_family,
            )
            .with_shard_threshold(self.config.shard_device_threshold);
        let worker = Arc::new(Worker::new(config, Arc::clone(&self.store)));
        let interval = self.config.stats_interval;
        let registered = self
            .registry
            .register(worker, self.shutdown.child_token(), |worker, cancel| {
                tokio::spawn(run_stats(worker, interval, cancel))
            })
            .await;

        if registered {
            info!(replicas = group.replicas, "Created worker");
            Ok(JobOutcome::Created)
        } else {
            debug!("Another event created the worker first");
            Ok(JobOutcome::Exists)
        }
    }

    /// Creates shard 0 of the job's summary, or resets an existing one.
    ///
    /// A record left behind by an earlier generation of the job keeps its
    /// labels; its payload, status and shard bookkeeping are replaced.
    async fn init_summary(&self, group: &JobGroup, now: DateTime<Utc>) -> Result<()> {
        let fresh = JobSummary::new(
            &group.namespace,
            &group.name,
            group.uid.clone(),
            &self.config.accelerator_family,
            now,
        )
        .with_framework(group.framework());

        match self.store.create(&fresh).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                let existing = self.store.get(&fresh.namespace, &fresh.name).await?;
                for index in 1..existing.shard_total {
                    let name = shard_name(&fresh.name, index);
                    match self.store.delete(&fresh.namespace, &name).await {
                        Err(e) if !e.is_not_found() => return Err(e.into()),
                        _ => {}
                    }
                }
                debug!(previous_uid = %existing.job_uid, "Resetting existing job summary");
                let reset = JobSummary {
                    labels: existing.labels,
                    ..fresh
                };
                self.store.update(&reset).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until shard 0 of the job's summary is readable.
    async fn wait_visible(&self, group: &JobGroup) -> Result<JobSummary> {
        let name = base_name(&group.name);
        let deadline = Instant::now() + self.config.visibility_timeout;
        loop {
            match self.store.get(&group.namespace, &name).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(AgentError::NotVisible {
                    namespace: group.namespace.clone(),
                    name,
                    timeout: self.config.visibility_timeout,
                });
            }
            tokio::time::sleep(self.config.visibility_poll_interval).await;
        }
    }

    async fn teardown_worker(&self, group: &JobGroup) -> Result<JobOutcome> {
        let Some(handle) = self.registry.remove(&group.uid).await else {
            debug!("No worker for deleted job");
            return Ok(JobOutcome::Absent);
        };
        handle.stop();

        let marked = self.mark_deleted(group, Utc::now()).await?;
        info!(records = marked, "Removed worker, job summary marked for deletion");
        Ok(JobOutcome::Deleted)
    }

    /// Marks every shard of this job generation's summary for deletion.
    ///
    /// Records that now belong to a newer generation of the job are left alone.
    async fn mark_deleted(&self, group: &JobGroup, now: DateTime<Utc>) -> Result<usize> {
        let base = base_name(&group.name);
        let head = match self.store.get(&group.namespace, &base).await {
            Ok(head) => head,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if head.job_uid != group.uid {
            debug!(owner = %head.job_uid, "Job summary belongs to another generation");
            return Ok(0);
        }

        let mut marked = 0;
        for index in 0..head.shard_total.max(1) {
            let name = shard_name(&base, index);
            let mut record = match self.store.get(&group.namespace, &name).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            record.mark_deleted(now);
            self.store.update(&record).await?;
            marked += 1;
        }
        Ok(marked)
    }
}
