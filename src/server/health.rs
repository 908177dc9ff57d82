//! Health check endpoint for liveness probes.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;
use crate::store::ObjectStore;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Number of live workers.
    pub workers: usize,
}

/// Returns 200 with the number of live workers.
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok","workers":3}
/// ```
pub async fn health_handler<S: ObjectStore>(
    State(app_state): State<AppState<S>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        workers: app_state.agent().worker_count().await,
    })
}
