//! Health and admin HTTP handlers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue monitoring (`/queues/stats`, `/queues/{name}/peek`)
//! - Prometheus metrics (`/metrics`)
//! - Admin endpoints (`/admin/dlq`, `DELETE /admin/queues/{name}`)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::JobQueue;
use crate::metrics;
use crate::registry::DEAD_LETTER_QUEUE;

/// Largest `count` accepted by the peek endpoints.
pub const MAX_PEEK_COUNT: usize = 100;

/// Shared state for health and admin endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub queue: JobQueue,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        queue: JobQueue,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe. Always OK while the server is up.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe, backed by `JobQueue::healthcheck`.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    if state.queue.healthcheck().await {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": { "redis": "ok" } })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": { "redis": "unreachable" } })),
        )
    }
}

/// `GET /queues/stats`
pub async fn stats_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let stats = state.queue.get_stats().await.map_err(internal_error)?;
    Ok(Json(json!({
        "namespace": state.queue.namespace(),
        "queues": stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PeekParams {
    /// Jobs to return (default: 10, max: 100)
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    10
}

/// `GET /queues/{name}/peek?count=10`
pub async fn peek_handler(
    State(state): State<HealthState>,
    Path(name): Path<String>,
    Query(params): Query<PeekParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    peek_json(&state.queue, &name, params.count).await
}

/// `GET /admin/dlq?count=10`
pub async fn dlq_handler(
    State(state): State<HealthState>,
    Query(params): Query<PeekParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    peek_json(&state.queue, DEAD_LETTER_QUEUE, params.count).await
}

async fn peek_json(
    queue: &JobQueue,
    name: &str,
    count: usize,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let count = count.min(MAX_PEEK_COUNT);
    let jobs = queue.peek(name, count).await.map_err(internal_error)?;
    let length = queue.length(name).await.map_err(internal_error)?;

    Ok(Json(json!({
        "queue": name,
        "length": length,
        "count": jobs.len(),
        "jobs": jobs,
    })))
}

/// Delete a queue.
///
/// WARNING: This permanently drops every job in it.
///
/// `DELETE /admin/queues/{name}`
pub async fn clear_queue_handler(
    State(state): State<HealthState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let cleared = state.queue.clear_queue(&name).await.map_err(internal_error)?;
    Ok(Json(json!({
        "success": true,
        "queue": name,
        "cleared": cleared,
    })))
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call init_metrics() at startup.".to_string(),
        ),
    }
}

fn internal_error(e: crate::error::QueueError) -> (StatusCode, Json<Value>) {
    let status = if e.is_connection_error() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// Liveness, readiness, queue monitoring and metrics.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queues/stats", get(stats_handler))
        .route("/queues/{name}/peek", get(peek_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Operator endpoints: DLQ inspection and queue deletion.
pub fn admin_router(state: HealthState) -> axum::Router {
    use axum::routing::{delete, get};

    axum::Router::new()
        .route("/admin/dlq", get(dlq_handler))
        .route("/admin/queues/{name}", delete(clear_queue_handler))
        .with_state(state)
}

/// [`health_router`] merged with [`admin_router`].
pub fn full_admin_router(state: HealthState) -> axum::Router {
    health_router(state.clone()).merge(admin_router(state))
}
