// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin HTTP façade over the backup engine.
//!
//! Handlers validate, call the engine or the store, and translate errors
//! into status codes; nothing here owns backup semantics. The WebSocket
//! route bridges the per-job progress bus to connected UIs.

#![deny(unsafe_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    Json, Router,
    extract::{Path as AxPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use cv_core::{BackupResult, Job, JobState, ProgressEvent, ResultState};
use cv_engine::{EngineError, Orchestrator};
use cv_forge::ForgeClient;
use cv_store::{BackupStore, Inventory};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The backup engine.
    pub orchestrator: Orchestrator,
    /// Job/result reads.
    pub store: Arc<dyn BackupStore>,
    /// Device/site reads.
    pub inventory: Arc<dyn Inventory>,
    /// Forge client for diff retrieval.
    pub forge: ForgeClient,
}

/// Request body for `POST /api/backups/jobs`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartJobRequest {
    /// Restrict the job to one site.
    #[serde(default)]
    pub site_id: Option<Uuid>,
    /// Restrict the job to specific devices.
    #[serde(default)]
    pub device_ids: Vec<Uuid>,
}

/// Job row plus its per-device results.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobDetail {
    /// The job itself.
    #[serde(flatten)]
    pub job: Job,
    /// Devices skipped by cancellation (derived).
    pub skipped: u32,
    /// Every recorded result.
    pub results: Vec<BackupResult>,
}

/// Structured API error returned on failure.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Create an error with the given status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::EmptySelection => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            EngineError::JobLimitReached => Self::new(StatusCode::CONFLICT, err.to_string()),
            EngineError::JobNotFound(_) => Self::not_found(err.to_string()),
            EngineError::Store(_) => Self::internal(err.to_string()),
        }
    }
}

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/api/backups/jobs", post(cmd_start_job).get(cmd_list_jobs))
        .route("/api/backups/jobs/{id}", get(cmd_job_detail))
        .route("/api/backups/device/{id}/history", get(cmd_device_history))
        .route("/api/backups/diff/{id}", get(cmd_diff))
        .route("/ws/job/{id}", get(ws_job))
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn cmd_start_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .orchestrator
        .start_job("api", req.site_id, req.device_ids)
        .await?;
    info!(job_id = %job.id, total = job.total, "job accepted");
    Ok((StatusCode::CREATED, Json(json!({ "job_id": job.id }))))
}

async fn cmd_list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .store
        .recent_jobs(50)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(jobs))
}

async fn cmd_job_detail(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobDetail>, ApiError> {
    let job = state
        .store
        .job(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("job not found"))?;
    if job.state == JobState::Failed {
        return Err(ApiError::internal("job failed before per-device work"));
    }
    let results = state
        .store
        .job_results(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let skipped = job.skipped();
    Ok(Json(JobDetail {
        job,
        skipped,
        results,
    }))
}

async fn cmd_device_history(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupResult>>, ApiError> {
    let device = state
        .inventory
        .device_context(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if device.is_none() {
        return Err(ApiError::not_found("device not found"));
    }
    let history = state
        .store
        .device_history(id, 5)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(history))
}

async fn cmd_diff(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let result = state
        .store
        .result(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("result not found"))?;
    if result.state != ResultState::Success {
        return Err(ApiError::not_found("result has no committed revision"));
    }
    let ctx = state
        .inventory
        .device_context(result.device_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("device no longer in inventory"))?;

    let diff = state
        .forge
        .diff(&ctx.site.repo_name, &ctx.device.config_file_name())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if diff.is_empty() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "only one revision exists for this file",
        ));
    }
    Ok(([("content-type", "text/plain; charset=utf-8")], diff).into_response())
}

// ---------------------------------------------------------------------------
// Progress WebSocket
// ---------------------------------------------------------------------------

async fn ws_job(
    ws: WebSocketUpgrade,
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let job = match state.store.job(id).await {
        Ok(Some(job)) => job,
        Ok(None) => return ApiError::not_found("job not found").into_response(),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };
    ws.on_upgrade(move |socket| stream_progress(socket, state, job))
}

/// Forward bus events as JSON text frames until the terminal event, then
/// close. The subscription snapshot means late joiners immediately see the
/// current counters.
async fn stream_progress(mut socket: WebSocket, state: Arc<AppState>, job: Job) {
    let fallback = snapshot_event(&job);
    let mut stream = state.orchestrator.bus().subscribe(job.id, fallback);
    while let Some(event) = stream.recv().await {
        let Ok(text) = serde_json::to_string(&event) else {
            break;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            return; // client went away
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

fn snapshot_event(job: &Job) -> ProgressEvent {
    ProgressEvent {
        job_id: job.id,
        total: job.total,
        completed: job.completed,
        failed: job.failed,
        state: job.state,
        last_device: None,
        last_status: None,
    }
}
