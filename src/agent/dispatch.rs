//! Routing pod events to workers.

use tracing::{debug, instrument, trace, warn};

use crate::store::ObjectStore;
use crate::types::{Pod, PodEventKind};
use crate::worker::Outcome;

use super::{Agent, Result};

/// What happened to a pod event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The pod has no owner; it cannot belong to a job.
    NoOwner,
    /// No worker exists for the pod's job. The event was dropped.
    NoWorker,
    /// A worker handled the event.
    Handled(Outcome),
}

impl<S: ObjectStore> Agent<S> {
    /// Routes one pod event to the worker of the pod's job.
    ///
    /// Without a worker, a delete has nothing to clean up and any other event
    /// is dropped; redelivery succeeds once the worker exists. Update events
    /// additionally run the job-completion check on the pod's phase.
    #[instrument(skip(self, pod), fields(pod = %pod, kind = %kind))]
    pub async fn do_work(&self, kind: PodEventKind, pod: &Pod) -> Result<Dispatched> {
        if pod.owner_uid().is_none() {
            trace!("Pod has no owner");
            return Ok(Dispatched::NoOwner);
        }

        let Some(worker) = self.registry.route(pod).await else {
            match kind {
                PodEventKind::Delete => debug!("No worker for deleted pod, nothing to clean up"),
                _ => debug!("Worker not yet initialized, dropping event"),
            }
            return Ok(Dispatched::NoWorker);
        };

        let result = worker.handle(kind, pod).await;
        if kind == PodEventKind::Update
            && let Err(e) = worker.check_job_completion(pod).await
        {
            warn!(error = %e, "Job completion check failed");
        }
        Ok(Dispatched::Handled(result?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::agent::tests::{agent_with_job, dispatch_fixture};
    use crate::store::JobStatus;
    use crate::test_utils::{PodBuilder, ready_pod};
    use crate::types::{JobUid, PodPhase};
    use crate::worker::WorkerError;

    #[tokio::test]
    async fn ownerless_pod_is_ignored() {
        let (_store, agent) = dispatch_fixture();
        let mut pod = PodBuilder::new("p0", "job-uid").build();
        pod.owner_references.clear();
        assert_eq!(
            agent.do_work(PodEventKind::Add, &pod).await.unwrap(),
            Dispatched::NoOwner
        );
    }

    #[tokio::test]
    async fn events_without_worker_are_dropped() {
        let (_store, agent) = dispatch_fixture();
        let pod = ready_pod(0, "job-uid", 8);
        assert_eq!(
            agent.do_work(PodEventKind::Add, &pod).await.unwrap(),
            Dispatched::NoWorker
        );
        assert_eq!(
            agent.do_work(PodEventKind::Delete, &pod).await.unwrap(),
            Dispatched::NoWorker
        );
    }

    #[tokio::test]
    async fn events_reach_the_owning_worker() {
        let (_store, agent) = agent_with_job("job-uid", 2).await;
        let outcome = agent
            .do_work(PodEventKind::Add, &ready_pod(0, "job-uid", 8))
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Handled(Outcome::Cached));
        assert_eq!(
            agent
                .snapshot(&JobUid::new("job-uid"))
                .await
                .unwrap()
                .cached_pods,
            1
        );
    }

    #[tokio::test]
    async fn recreated_job_pod_is_classified_by_same_name_worker() {
        let (_store, agent) = agent_with_job("job-uid", 1).await;
        let stale = PodBuilder::new("p0", "old-uid")
            .devices(8)
            .created(crate::test_utils::job_created() - chrono::Duration::hours(1))
            .build();

        let err = agent.do_work(PodEventKind::Add, &stale).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Worker(WorkerError::StalePod { .. })
        ));
    }

    #[tokio::test]
    async fn update_runs_completion_check_even_on_complete_table() {
        let (store, agent) = agent_with_job("job-uid", 1).await;
        agent
            .do_work(PodEventKind::Add, &ready_pod(0, "job-uid", 8))
            .await
            .unwrap();

        let mut succeeded = ready_pod(0, "job-uid", 8);
        succeeded.phase = PodPhase::Succeeded;
        let err = agent
            .do_work(PodEventKind::Update, &succeeded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Worker(WorkerError::TableComplete { .. })
        ));
        assert_eq!(
            store
                .peek("default", "rings-config-job")
                .unwrap()
                .job_status,
            JobStatus::Complete
        );
    }
}
