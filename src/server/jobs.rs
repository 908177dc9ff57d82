//! Job inspection endpoints for observability.
//!
//! Read-only views of the agent's workers, for debugging and monitoring.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::store::ObjectStore;
use crate::types::JobUid;
use crate::worker::WorkerSnapshot;

/// Errors that can occur when fetching a job.
#[derive(Debug, Error)]
pub enum JobsError {
    /// No worker exists for the UID.
    #[error("no worker for job {0}")]
    NotFound(JobUid),
}

impl IntoResponse for JobsError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobsError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

/// Lists every worker's snapshot, ordered by namespace and job name.
pub async fn jobs_handler<S: ObjectStore>(
    State(app_state): State<AppState<S>>,
) -> Json<Vec<WorkerSnapshot>> {
    Json(app_state.agent().snapshots().await)
}

/// Returns one worker's snapshot.
///
/// # Response
///
/// - 200 OK with a JSON `WorkerSnapshot`
/// - 404 Not Found if no worker exists for the job UID
pub async fn job_handler<S: ObjectStore>(
    State(app_state): State<AppState<S>>,
    Path(uid): Path<String>,
) -> Result<Json<WorkerSnapshot>, JobsError> {
    let uid = JobUid::new(uid);
    match app_state.agent().snapshot(&uid).await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(JobsError::NotFound(uid)),
    }
}
