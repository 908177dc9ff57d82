//! Periodic statistics reporting for a worker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::store::ObjectStore;

use super::worker::Worker;

/// Logs the worker's progress and health every `interval` until cancelled.
#[instrument(skip_all, fields(job = %worker.identity()))]
pub async fn run_stats<S: ObjectStore>(
    worker: Arc<Worker<S>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Statistics reporter stopped");
                return;
            }
            _ = ticker.tick() => {
                let snapshot = worker.snapshot().await;
                if snapshot.healthy {
                    info!(
                        cached = snapshot.cached_pods,
                        replicas = snapshot.replicas,
                        table_status = %snapshot.table_status,
                        job_status = %snapshot.job_status,
                        servers = snapshot.server_count,
                        "Job statistics"
                    );
                } else {
                    warn!(
                        cached = snapshot.cached_pods,
                        replicas = snapshot.replicas,
                        table_status = %snapshot.table_status,
                        job_status = %snapshot.job_status,
                        unhealthy_ranks = ?snapshot.unhealthy_ranks,
                        "Job has unhealthy ranks"
                    );
                }
            }
        }
    }
}
