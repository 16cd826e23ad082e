//! Stage agents
//!
//! One generic polling loop, [`StageAgent`], parameterized by a
//! [`StageProcessor`] that does the work of one stage. Each agent:
//!
//! 1. queries the Item Store for items eligible for its stage
//! 2. hands each one to its processor, one at a time or all concurrently
//! 3. merges the processor's patch through the store's guarded update
//! 4. sleeps for its poll interval
//!
//! Failures are logged and leave the item's flag untouched, so the item is
//! picked up again on the next cycle. Nothing that happens to one item or
//! one batch stops the loop.

pub mod acquisition;
pub mod summarization;
pub mod text_extraction;
pub mod transcription;

pub use acquisition::AcquisitionProcessor;
pub use summarization::SummarizationProcessor;
pub use text_extraction::TextExtractionProcessor;
pub use transcription::TranscriptionProcessor;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tubeflow_common::events::{EventBus, PipelineEvent};

use crate::db::ItemStore;
use crate::error::StageError;
use crate::models::{ItemPatch, Stage, WorkItem};

/// How a batch's items are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One item at a time, in eligibility order
    Serial,
    /// Every item of the batch at once
    Concurrent,
}

/// The work of one pipeline stage
#[async_trait]
pub trait StageProcessor: Send + Sync + 'static {
    /// Agent name used in logs and events
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn dispatch(&self) -> Dispatch;

    /// Runs at the start of every cycle, before eligible items are queried
    async fn refresh(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before a non-empty batch; an error skips the batch
    async fn acquire_resources(&self) -> Result<(), StageError> {
        Ok(())
    }

    /// Called after a batch that acquired resources
    async fn release_resources(&self) {}

    /// Process one item snapshot and describe the fields to merge
    ///
    /// The stage's own flag is set by the agent on success.
    async fn process(&self, item: WorkItem) -> Result<ItemPatch, StageError>;
}

/// Result of processing one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed,
    /// An earlier stage's flag was cleared after its artifact went missing
    Repaired,
}

/// Counts for one `process_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub eligible: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub repaired: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Repaired => self.repaired += 1,
        }
    }
}

/// Generic stage polling loop
pub struct StageAgent<P: StageProcessor> {
    processor: Arc<P>,
    store: ItemStore,
    event_bus: EventBus,
    poll_interval: Duration,
    /// Consecutive failures per source id, for logging only
    failures: Arc<StdMutex<HashMap<String, u32>>>,
}

impl<P: StageProcessor> Clone for StageAgent<P> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            store: self.store.clone(),
            event_bus: self.event_bus.clone(),
            poll_interval: self.poll_interval,
            failures: Arc::clone(&self.failures),
        }
    }
}

impl<P: StageProcessor> StageAgent<P> {
    pub fn new(processor: Arc<P>, store: ItemStore, event_bus: EventBus, poll_interval: Duration) -> Self {
        Self {
            processor,
            store,
            event_bus,
            poll_interval,
            failures: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.processor.name()
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    /// Consecutive failures recorded for `source_id`
    pub fn failure_count(&self, source_id: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source_id)
            .copied()
            .unwrap_or(0)
    }

    /// Poll until `cancel` fires
    ///
    /// A batch in progress is always finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let agent = self.name();
        info!(agent, poll_secs = self.poll_interval.as_secs_f64(), "Agent started");
        self.event_bus.emit_lossy(PipelineEvent::AgentStarted {
            agent: agent.to_string(),
            timestamp: Utc::now(),
        });

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Separate task so a panic surfaces as a JoinError instead of
            // unwinding through the loop
            let this = self.clone();
            match tokio::spawn(async move { this.process_batch().await }).await {
                Ok(Ok(report)) if report.eligible > 0 => {
                    info!(
                        agent,
                        eligible = report.eligible,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        repaired = report.repaired,
                        "Batch finished"
                    );
                }
                Ok(Ok(_)) => debug!(agent, "Nothing eligible"),
                Ok(Err(e)) => error!(agent, error = %e, "Batch failed"),
                Err(e) => error!(agent, error = %e, "Batch panicked"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(agent, "Agent stopped");
        self.event_bus.emit_lossy(PipelineEvent::AgentStopped {
            agent: agent.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// One polling cycle: process every currently eligible item
    pub async fn process_batch(&self) -> anyhow::Result<BatchReport> {
        let agent = self.name();
        let stage = self.processor.stage();

        if let Err(e) = self.processor.refresh().await {
            warn!(agent, error = %e, "Refresh failed");
        }

        let items = self.store.get(&stage.eligibility()).await?;
        self.retain_failures(&items);
        let mut report = BatchReport {
            eligible: items.len(),
            ..BatchReport::default()
        };
        if items.is_empty() {
            return Ok(report);
        }

        self.processor
            .acquire_resources()
            .await
            .map_err(|e| anyhow::anyhow!("{} resources unavailable, batch skipped: {}", agent, e))?;

        match self.processor.dispatch() {
            Dispatch::Serial => {
                for item in items {
                    // Own task per item so a panic still reaches release_resources
                    let this = self.clone();
                    match tokio::spawn(async move { this.process_one(item).await }).await {
                        Ok(outcome) => report.record(outcome),
                        Err(e) => {
                            error!(agent, error = %e, "Item task panicked");
                            report.record(ItemOutcome::Failed);
                        }
                    }
                }
            }
            Dispatch::Concurrent => {
                let mut tasks = JoinSet::new();
                for item in items {
                    let this = self.clone();
                    tasks.spawn(async move { this.process_one(item).await });
                }
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(outcome) => report.record(outcome),
                        Err(e) => {
                            error!(agent, error = %e, "Item task panicked");
                            report.record(ItemOutcome::Failed);
                        }
                    }
                }
            }
        }

        self.processor.release_resources().await;
        Ok(report)
    }

    async fn process_one(&self, item: WorkItem) -> ItemOutcome {
        let stage = self.processor.stage();
        let source_id = item.source_id.clone();

        match self.processor.process(item).await {
            Ok(patch) => {
                let patch = patch.with_flag(stage, true);
                match self.store.update(&source_id, &patch).await {
                    Ok(_) => {
                        self.clear_failures(&source_id);
                        info!(agent = self.name(), source_id = %source_id, %stage, "Stage completed");
                        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
                            source_id,
                            stage: stage.to_string(),
                            timestamp: Utc::now(),
                        });
                        ItemOutcome::Succeeded
                    }
                    Err(e) => self.note_failure(&source_id, &format!("store update failed: {}", e)),
                }
            }
            Err(StageError::MissingUpstream { stage: upstream, detail }) if upstream < stage => {
                warn!(
                    agent = self.name(),
                    source_id = %source_id,
                    %upstream,
                    detail = %detail,
                    "Upstream artifact missing, clearing its flag"
                );
                match self.store.update(&source_id, &ItemPatch::reset(upstream)).await {
                    Ok(_) => {
                        self.clear_failures(&source_id);
                        self.event_bus.emit_lossy(PipelineEvent::FlagReset {
                            source_id,
                            stage: upstream.to_string(),
                            reason: detail,
                            timestamp: Utc::now(),
                        });
                        ItemOutcome::Repaired
                    }
                    Err(e) => self.note_failure(&source_id, &format!("flag reset failed: {}", e)),
                }
            }
            Err(e) => self.note_failure(&source_id, &e.to_string()),
        }
    }

    fn note_failure(&self, source_id: &str, message: &str) -> ItemOutcome {
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            let count = failures.entry(source_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        warn!(agent = self.name(), source_id, attempt, error = %message, "Stage attempt failed");
        self.event_bus.emit_lossy(PipelineEvent::StageFailed {
            source_id: source_id.to_string(),
            stage: self.processor.stage().to_string(),
            attempt,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        ItemOutcome::Failed
    }

    /// Forget failure counts of items that are no longer eligible
    fn retain_failures(&self, eligible: &[WorkItem]) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.retain(|source_id, _| eligible.iter().any(|item| &item.source_id == source_id));
    }

    fn clear_failures(&self, source_id: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source_id);
    }
}

/// Object-safe handle the Pipeline Manager runs
#[async_trait]
pub trait RunnableAgent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: CancellationToken);
}

#[async_trait]
impl<P: StageProcessor> RunnableAgent for StageAgent<P> {
    fn name(&self) -> &'static str {
        StageAgent::name(self)
    }

    async fn run(&self, cancel: CancellationToken) {
        StageAgent::run(self, cancel).await
    }
}
