//! tubeflow-pipeline library interface
//!
//! Media items move through four stages, each driven by its own polling
//! agent against a shared SQLite Item Store:
//!
//! acquire → transcribe → extract text → summarize
//!
//! Exposes the pipeline components and the HTTP router for the binary and
//! for integration testing.

pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod manager;
pub mod models;
pub mod queue;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, StageError};
pub use crate::manager::{Collaborators, PipelineManager};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tubeflow_common::events::EventBus;

use crate::db::ItemStore;
use crate::queue::SubmissionQueue;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: ItemStore,
    pub queue: Arc<SubmissionQueue>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last stage failure for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(store: ItemStore, queue: Arc<SubmissionQueue>, event_bus: EventBus) -> Self {
        Self {
            store,
            queue,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::queue_routes())
        .merge(api::item_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
