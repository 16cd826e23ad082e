//! Error types for tubeflow-pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::Stage;

/// Failure of one stage attempt on one item
#[derive(Debug, Error)]
pub enum StageError {
    /// The artifact an earlier stage should have produced is gone
    ///
    /// `stage` names the earlier stage whose flag gets cleared.
    #[error("missing {stage} artifact: {detail}")]
    MissingUpstream { stage: Stage, detail: String },

    /// Exclusive resource (e.g. transcription model) could not be provided
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// Any other failure; the item is retried on the next poll
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StageError {
    pub fn missing(stage: Stage, detail: impl Into<String>) -> Self {
        StageError::MissingUpstream {
            stage,
            detail: detail.into(),
        }
    }
}

impl From<tubeflow_common::Error> for StageError {
    fn from(err: tubeflow_common::Error) -> Self {
        StageError::Failed(err.into())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Failed(err.into())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// tubeflow-common error
    #[error("Common error: {0}")]
    Common(#[from] tubeflow_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(tubeflow_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(tubeflow_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
