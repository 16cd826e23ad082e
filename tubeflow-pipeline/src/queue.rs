//! Submission Queue: deduplicating FIFO intake for acquisition requests
//!
//! A single worker task drains the queue, so at most one acquisition runs at
//! a time. Status of every submission is kept for the process lifetime.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tubeflow_common::events::{EventBus, PipelineEvent};

use crate::models::{QueueEntry, QueueStatus, SubmitOptions};

/// Consumer of dequeued entries
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    async fn process_entry(&self, entry: QueueEntry) -> anyhow::Result<()>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    statuses: HashMap<String, QueueStatus>,
    in_flight: HashSet<String>,
}

pub struct SubmissionQueue {
    state: StdMutex<QueueState>,
    notify: Notify,
    cancel: CancellationToken,
    idle: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    event_bus: Option<EventBus>,
}

impl SubmissionQueue {
    /// `idle` bounds how long the worker sleeps when nothing is pending
    pub fn new(idle: Duration) -> Self {
        Self {
            state: StdMutex::new(QueueState::default()),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            idle,
            worker: Mutex::new(None),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an acquisition request
    ///
    /// Returns false when the same source id is already queued or
    /// processing, or when the queue has been shut down.
    pub fn submit(&self, source_id: &str, options: SubmitOptions) -> bool {
        if self.cancel.is_cancelled() {
            warn!(source_id, "Submission rejected: queue is shut down");
            return false;
        }

        {
            let mut state = self.state();
            if state
                .statuses
                .get(source_id)
                .is_some_and(|status| status.is_active())
            {
                debug!(source_id, "Duplicate submission rejected");
                return false;
            }
            state.statuses.insert(source_id.to_string(), QueueStatus::Queued);
            state.pending.push_back(QueueEntry::new(source_id, options));
        }

        self.notify.notify_one();
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(PipelineEvent::ItemQueued {
                source_id: source_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        info!(source_id, force = options.force, run_until = %options.run_until, "Queued acquisition");
        true
    }

    /// Current status, `None` if never submitted
    pub fn status(&self, source_id: &str) -> Option<QueueStatus> {
        self.state().statuses.get(source_id).copied()
    }

    /// Number of entries waiting for the worker
    pub fn size(&self) -> usize {
        self.state().pending.len()
    }

    /// Number of entries the worker is processing right now
    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn next_entry(&self) -> Option<QueueEntry> {
        let mut state = self.state();
        let entry = state.pending.pop_front()?;
        state
            .statuses
            .insert(entry.source_id.clone(), QueueStatus::Processing);
        state.in_flight.insert(entry.source_id.clone());
        Some(entry)
    }

    fn finish(&self, source_id: &str, status: QueueStatus) {
        let mut state = self.state();
        state.in_flight.remove(source_id);
        state.statuses.insert(source_id.to_string(), status);
    }

    /// Spawn the worker; false if one is already running
    pub async fn start_worker(self: &Arc<Self>, processor: Arc<dyn EntryProcessor>) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }
        let queue = Arc::clone(self);
        *worker = Some(tokio::spawn(async move { queue.work(processor).await }));
        true
    }

    async fn work(self: Arc<Self>, processor: Arc<dyn EntryProcessor>) {
        info!("Submission queue worker started");

        loop {
            if let Some(entry) = self.next_entry() {
                let source_id = entry.source_id.clone();
                let processor = Arc::clone(&processor);

                // Separate task so a panicking processor only fails this entry
                let outcome = tokio::spawn(async move { processor.process_entry(entry).await }).await;

                let status = match outcome {
                    Ok(Ok(())) => {
                        info!(source_id = %source_id, "Acquisition completed");
                        QueueStatus::Completed
                    }
                    Ok(Err(e)) => {
                        error!(source_id = %source_id, error = %e, "Acquisition failed");
                        QueueStatus::Error
                    }
                    Err(e) => {
                        error!(source_id = %source_id, error = %e, "Acquisition task panicked");
                        QueueStatus::Error
                    }
                };
                self.finish(&source_id, status);

                if self.cancel.is_cancelled() {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.idle) => {}
            }
        }

        info!(pending = self.size(), "Submission queue worker stopped");
    }

    /// Stop the worker after its current entry
    ///
    /// Returns false if the worker did not exit within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Submission queue worker panicked");
                true
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs_f64(), "Submission queue worker did not stop in time");
                false
            }
        }
    }
}
