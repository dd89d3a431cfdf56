//! HTTP handlers. Thin wrappers over the session controller; every
//! domain decision lives in the controller, handlers only translate
//! between HTTP and `SessionError`.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::{BulkSlotOutcome, CreateSessionRequest, SessionRecord, SlotStatus};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Upper bound on a single bulk-create request.
const MAX_BULK_COUNT: usize = 50;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub available_ports: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.controller.uptime_seconds(),
        active_sessions: state.controller.active_count().await,
        max_sessions: state.controller.max_sessions(),
        available_ports: state.controller.available_port_count().await,
    })
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionRecord>,
    pub total_count: usize,
}

/// GET /v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<SessionListResponse>> {
    let sessions = state.controller.list().await?;
    let total_count = sessions.len();
    Ok(Json(SessionListResponse {
        sessions,
        total_count,
    }))
}

/// POST /v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionRecord>)> {
    let record = state.controller.create(request.session_id).await?;
    info!(session_id = %record.id, port = record.port, "session created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    let record = state
        .controller
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session '{id}' not found")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub session_id: String,
    pub released: bool,
}

/// POST /v1/sessions/release
pub async fn release_session(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> ApiResult<Json<ReleaseResponse>> {
    let released = state.controller.release(&request.session_id).await?;
    if !released {
        return Err(ApiError::not_found(format!(
            "session '{}' not found",
            request.session_id
        )));
    }

    info!(session_id = %request.session_id, "session released");
    Ok(Json(ReleaseResponse {
        session_id: request.session_id,
        released,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateRequest {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub requested: usize,
    pub created: usize,
    pub failed: usize,
    pub slots: Vec<BulkSlotOutcome>,
}

/// POST /v1/sessions/multiple
pub async fn create_sessions_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkCreateRequest>,
) -> ApiResult<Json<BulkCreateResponse>> {
    if request.count == 0 || request.count > MAX_BULK_COUNT {
        return Err(ApiError::bad_request(format!(
            "count must be between 1 and {MAX_BULK_COUNT}"
        )));
    }

    let slots = state.controller.bulk_create(request.count).await?;
    let created = slots
        .iter()
        .filter(|s| s.status == SlotStatus::Created)
        .count();

    info!(requested = request.count, created, "bulk session create");
    Ok(Json(BulkCreateResponse {
        requested: request.count,
        created,
        failed: request.count - created,
        slots,
    }))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub closed: usize,
}

/// POST /v1/sessions/cleanup
pub async fn cleanup_sessions(State(state): State<AppState>) -> Json<CleanupResponse> {
    let closed = state.controller.cleanup_all().await;
    info!(closed, "cleanup requested");
    Json(CleanupResponse { closed })
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub url: String,
}

/// POST /v1/sessions/{id}/preview
pub async fn set_preview_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<StatusCode> {
    if request.url.is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }

    state.controller.set_preview_link(&id, &request.url).await?;
    Ok(StatusCode::NO_CONTENT)
}
