//! HTTP API handlers for tubeflow
//!
//! Thin layer over the Submission Queue and the Item Store, plus SSE
//! forwarding of pipeline events.

pub mod health;
pub mod items;
pub mod queue;
pub mod sse;

pub use health::{health_routes, track_last_error};
pub use items::item_routes;
pub use queue::queue_routes;
pub use sse::event_stream;
