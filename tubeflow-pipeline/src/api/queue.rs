//! Submission endpoints
//!
//! POST /queue, GET /queue, GET /queue/:source_id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{Stage, SubmitOptions};
use crate::services::extract_video_id;
use crate::AppState;

/// POST /queue request
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Video id or a watch/short/live URL
    pub source_id: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub run_until: Option<Stage>,
}

/// POST /queue response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub source_id: String,
    pub status: String,
}

/// GET /queue/:source_id response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub source_id: String,
    /// queued, processing, completed, error or absent
    pub status: String,
}

/// GET /queue response
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueSummary {
    pub size: usize,
    pub in_flight: usize,
}

fn status_string(state: &AppState, source_id: &str) -> String {
    state
        .queue
        .status(source_id)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| "absent".to_string())
}

/// POST /queue
///
/// 202 whether or not the request was accepted; `accepted = false` means the
/// same id is already queued or processing.
pub async fn submit_acquisition(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let source_id = extract_video_id(&request.source_id)
        .ok_or_else(|| ApiError::BadRequest(format!("Not a video id or URL: {}", request.source_id)))?;

    if state.queue.is_shut_down() {
        return Err(ApiError::Conflict("Pipeline is shutting down".to_string()));
    }

    let options = SubmitOptions {
        force: request.force,
        run_until: request.run_until.unwrap_or(Stage::Summarize),
    };
    let accepted = state.queue.submit(&source_id, options);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            accepted,
            status: status_string(&state, &source_id),
            source_id,
        }),
    ))
}

/// GET /queue/:source_id
pub async fn query_status(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: status_string(&state, &source_id),
        source_id,
    })
}

/// GET /queue
pub async fn queue_summary(State(state): State<AppState>) -> Json<QueueSummary> {
    Json(QueueSummary {
        size: state.queue.size(),
        in_flight: state.queue.in_flight_count(),
    })
}

/// Build submission routes
pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/queue", post(submit_acquisition).get(queue_summary))
        .route("/queue/:source_id", get(query_status))
}
