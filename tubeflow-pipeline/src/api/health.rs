//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tubeflow_common::events::PipelineEvent;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the store is unreachable
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue_size: usize,
    /// Last stage failure, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "degraded",
    };
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: status.to_string(),
        module: "tubeflow".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        queue_size: state.queue.size(),
        last_error,
    })
}

/// Record the latest stage failure in `state.last_error`
pub fn track_last_error(state: &AppState) -> JoinHandle<()> {
    let mut rx = state.event_bus.subscribe();
    let last_error = state.last_error.clone();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::StageFailed {
                    source_id,
                    stage,
                    message,
                    ..
                }) => {
                    *last_error.write().await = Some(format!("{} {}: {}", stage, source_id, message));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
