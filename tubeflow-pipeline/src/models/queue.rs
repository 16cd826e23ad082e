//! Submission queue entries and status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// Processing options attached to an acquisition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Reprocess an already known item, clearing its later stage flags
    pub force: bool,
    /// Last stage to run for this item
    pub run_until: Stage,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            force: false,
            run_until: Stage::Summarize,
        }
    }
}

/// An acquisition request waiting for the queue worker
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub source_id: String,
    pub options: SubmitOptions,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(source_id: impl Into<String>, options: SubmitOptions) -> Self {
        Self {
            source_id: source_id.into(),
            options,
            enqueued_at: Utc::now(),
        }
    }
}

/// Transient, process-lifetime status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl QueueStatus {
    /// Queued or processing: a new submission for the same id is rejected
    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Error => "error",
        }
    }
}
