//! HTTP API for optimizer control, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use optimizer_lib::{ComponentStatus, Optimizer, OptimizerError};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub optimizer: Arc<Optimizer>,
}

impl AppState {
    pub fn new(optimizer: Arc<Optimizer>) -> Self {
        Self { optimizer }
    }
}

/// Optimizer errors rendered as `{error, message}` bodies
pub struct ApiError(OptimizerError);

impl From<OptimizerError> for ApiError {
    fn from(err: OptimizerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OptimizerError::InvalidConfig { .. } | OptimizerError::InvalidInstanceName(_) => {
                StatusCode::BAD_REQUEST
            }
            OptimizerError::ConcurrentRestartRace { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }

        let body = json!({ "error": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

/// `{key, value}` body for configuration updates
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct PostponeRequest {
    pub seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.optimizer.health_registry().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.optimizer.health_registry().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.optimizer.status().await)
}

async fn run_once(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state.optimizer.run_once().await;
    Json(json!({ "ok": true, "events": events }))
}

async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.optimizer.set_config(&update.key, update.value).await?;
    Ok(Json(json!({ "ok": true, "config": config })))
}

async fn instance_stats(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.optimizer.instance_stats(&name) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no-stats" }))).into_response(),
    }
}

/// Raw log text, or the parsed last `lines` entries when requested
async fn instance_logs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    match query.lines {
        Some(lines) => Json(state.optimizer.read_logs(&name, lines).await).into_response(),
        None => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            state.optimizer.tail_logs(&name).await,
        )
            .into_response(),
    }
}

async fn optimize_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.optimizer.trigger_optimize(&name).await {
        Json(json!({ "ok": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "unknown-instance" })),
        )
            .into_response()
    }
}

async fn set_instance_config(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(update): Json<ConfigUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .optimizer
        .set_instance_config(&name, &update.key, update.value)
        .await?;
    Ok(Json(json!({ "ok": true, "instance": record })))
}

async fn cancel_restart(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cancelled = state.optimizer.cancel_scheduled_restart(&name).await?;
    Ok(Json(json!({ "ok": true, "cancelled": cancelled })))
}

async fn postpone_restart(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<PostponeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let execute_at = state
        .optimizer
        .postpone_scheduled_restart(&name, request.seconds)
        .await?;
    Ok(Json(json!({ "ok": true, "execute_at": execute_at })))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/optimizer/status", get(status))
        .route("/optimizer/run-once", post(run_once))
        .route("/optimizer/config", post(set_config))
        .route("/optimizer/instances/:name/stats", get(instance_stats))
        .route("/optimizer/instances/:name/logs", get(instance_logs))
        .route("/optimizer/instances/:name/optimize", post(optimize_instance))
        .route("/optimizer/instances/:name/config", post(set_instance_config))
        .route("/optimizer/instances/:name/cancel-restart", post(cancel_restart))
        .route("/optimizer/instances/:name/postpone-restart", post(postpone_restart))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
