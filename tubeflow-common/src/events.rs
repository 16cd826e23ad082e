//! Event types for the tubeflow event system
//!
//! Agents publish progress on a broadcast [`EventBus`]; the HTTP layer
//! forwards it to SSE clients. Emission is lossy: nobody listening is not an
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Acquisition request accepted by the submission queue
    ItemQueued {
        source_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Source media fetched and the work item row written
    ItemAcquired {
        source_id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage flag flipped to true
    StageCompleted {
        source_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage attempt failed; the flag is left unchanged
    StageFailed {
        source_id: String,
        stage: String,
        attempt: u32,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Data drift repair reset an earlier stage flag
    FlagReset {
        source_id: String,
        stage: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Agent loop started
    AgentStarted {
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// Agent loop exited after a stop signal
    AgentStopped {
        agent: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::ItemQueued { .. } => "ItemQueued",
            PipelineEvent::ItemAcquired { .. } => "ItemAcquired",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::StageFailed { .. } => "StageFailed",
            PipelineEvent::FlagReset { .. } => "FlagReset",
            PipelineEvent::AgentStarted { .. } => "AgentStarted",
            PipelineEvent::AgentStopped { .. } => "AgentStopped",
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PipelineEvent::ItemQueued {
            source_id: "abc123".to_string(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "ItemQueued");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(PipelineEvent::AgentStarted {
            agent: "transcriber".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::StageCompleted {
            source_id: "abc123".to_string(),
            stage: "transcribe".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageCompleted");
        assert_eq!(json["stage"], "transcribe");
    }
}
