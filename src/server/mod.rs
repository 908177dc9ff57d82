//! HTTP server for the controller.
//!
//! Read-only: events arrive through the event source, never over HTTP.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 while the process is serving
//! - `GET /api/v1/jobs` - Lists a snapshot of every live worker
//! - `GET /api/v1/jobs/{uid}` - Returns the snapshot of one worker, or 404

use std::sync::Arc;

use crate::agent::Agent;
use crate::store::ObjectStore;

pub mod health;
pub mod jobs;

pub use health::health_handler;
pub use jobs::{job_handler, jobs_handler};

/// Shared application state, passed to handlers via Axum's `State` extractor.
pub struct AppState<S> {
    agent: Arc<Agent<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            agent: Arc::clone(&self.agent),
        }
    }
}

impl<S: ObjectStore> AppState<S> {
    pub fn new(agent: Arc<Agent<S>>) -> Self {
        AppState { agent }
    }

    pub fn agent(&self) -> &Agent<S> {
        &self.agent
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S: ObjectStore>(agent: Arc<Agent<S>>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/api/v1/jobs", get(jobs_handler::<S>))
        .route("/api/v1/jobs/{uid}", get(job_handler::<S>))
        .with_state(AppState::new(agent))
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::agent::tests::agent_with_job;
    use crate::store::MemoryStore;
    use crate::test_utils::ready_pod;
    use crate::types::PodEventKind;

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn router_with_job() -> (Arc<Agent<MemoryStore>>, axum::Router) {
        let (_store, agent) = agent_with_job("u1", 2).await;
        agent
            .do_work(PodEventKind::Add, &ready_pod(0, "u1", 8))
            .await
            .unwrap();
        let agent = Arc::new(agent);
        (Arc::clone(&agent), build_router(agent))
    }

    #[tokio::test]
    async fn health_reports_worker_count() {
        let (_agent, app) = router_with_job().await;
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["workers"], 1);
    }

    #[tokio::test]
    async fn jobs_lists_snapshots() {
        let (_agent, app) = router_with_job().await;
        let (status, body) = get(app, "/api/v1/jobs").await;
        assert_eq!(status, StatusCode::OK);

        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["identity"]["uid"], "u1");
        assert_eq!(jobs[0]["cached_pods"], 1);
        assert_eq!(jobs[0]["replicas"], 2);
        assert_eq!(jobs[0]["table_status"], "initializing");
        assert_eq!(jobs[0]["job_status"], "pending");
        assert_eq!(jobs[0]["device_count"], 8);
        assert_eq!(jobs[0]["healthy"], true);
    }

    #[tokio::test]
    async fn job_by_uid() {
        let (_agent, app) = router_with_job().await;
        let (status, body) = get(app.clone(), "/api/v1/jobs/u1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["identity"]["name"], "job");
        assert_eq!(body["server_count"], 1);

        let (status, _) = get(app, "/api/v1/jobs/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_agent_lists_nothing() {
        let agent = Arc::new(Agent::new(
            crate::config::AgentConfig::new(),
            Arc::new(MemoryStore::new()),
        ));
        let (status, body) = get(build_router(agent), "/api/v1/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
