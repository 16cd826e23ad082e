//! Pipeline Manager: owns the submission queue and the stage agents

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tubeflow_common::events::EventBus;
use tubeflow_common::Result;

use crate::agents::{
    AcquisitionProcessor, RunnableAgent, StageAgent, SummarizationProcessor,
    TextExtractionProcessor, TranscriptionProcessor,
};
use crate::config::PipelineSettings;
use crate::db::ItemStore;
use crate::queue::{EntryProcessor, SubmissionQueue};
use crate::services::{Acquirer, SourceDiscovery, Summarizer, TextExtractor, TranscriptionBackend};

/// Collaborators the standard four-stage pipeline is built from
pub struct Collaborators {
    pub discovery: Option<Arc<dyn SourceDiscovery>>,
    pub acquirer: Arc<dyn Acquirer>,
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub summarizer: Arc<dyn Summarizer>,
}

pub struct PipelineManager {
    store: ItemStore,
    queue: Arc<SubmissionQueue>,
    queue_processor: Option<Arc<dyn EntryProcessor>>,
    agents: Vec<Arc<dyn RunnableAgent>>,
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineManager {
    /// Empty manager; add agents with [`PipelineManager::with_agent`]
    pub fn new(store: ItemStore, queue: Arc<SubmissionQueue>) -> Self {
        Self {
            store,
            queue,
            queue_processor: None,
            agents: Vec::new(),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Acquisition, transcription, text extraction and summarization agents
    /// wired to one store, queue and event bus
    pub fn assemble(
        store: ItemStore,
        event_bus: EventBus,
        settings: &PipelineSettings,
        collaborators: Collaborators,
    ) -> Self {
        let queue = Arc::new(SubmissionQueue::new(settings.queue_idle).with_event_bus(event_bus.clone()));
        let artifacts = store.artifacts().clone();

        let mut acquisition = AcquisitionProcessor::new(
            store.clone(),
            Arc::clone(&queue),
            Arc::clone(&collaborators.acquirer),
            event_bus.clone(),
        );
        if let Some(discovery) = collaborators.discovery {
            acquisition = acquisition.with_discovery(
                discovery,
                settings.channels.clone(),
                settings.max_results,
            );
        }
        let acquisition = Arc::new(acquisition);

        let transcription = Arc::new(
            TranscriptionProcessor::new(collaborators.transcription, collaborators.acquirer, artifacts)
                .keep_media(settings.keep_media),
        );
        let text = Arc::new(TextExtractionProcessor::new(collaborators.text_extractor));
        let summary = Arc::new(SummarizationProcessor::new(collaborators.summarizer));

        Self::new(store.clone(), queue)
            .with_queue_processor(acquisition.clone())
            .with_agent(Arc::new(StageAgent::new(
                acquisition,
                store.clone(),
                event_bus.clone(),
                settings.acquisition_poll,
            )))
            .with_agent(Arc::new(StageAgent::new(
                transcription,
                store.clone(),
                event_bus.clone(),
                settings.transcription_poll,
            )))
            .with_agent(Arc::new(StageAgent::new(
                text,
                store.clone(),
                event_bus.clone(),
                settings.text_poll,
            )))
            .with_agent(Arc::new(StageAgent::new(
                summary,
                store,
                event_bus,
                settings.summary_poll,
            )))
    }

    pub fn with_queue_processor(mut self, processor: Arc<dyn EntryProcessor>) -> Self {
        self.queue_processor = Some(processor);
        self
    }

    pub fn with_agent(mut self, agent: Arc<dyn RunnableAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn queue(&self) -> &Arc<SubmissionQueue> {
        &self.queue
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn agent_names(&self) -> Vec<&'static str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Launch the queue worker and every agent loop
    ///
    /// Returns once everything is scheduled. An unreachable store is the
    /// only error.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Pipeline already running");
            return Ok(());
        }
        self.store.ping().await?;

        if let Some(processor) = &self.queue_processor {
            self.queue.start_worker(Arc::clone(processor)).await;
        }

        for agent in &self.agents {
            let agent = Arc::clone(agent);
            let cancel = self.cancel.child_token();
            let name = agent.name();
            let handle = tokio::spawn(async move { agent.run(cancel).await });
            self.handles.push((name, handle));
        }

        info!(agents = ?self.agent_names(), "Pipeline started");
        Ok(())
    }

    /// Signal every agent and the queue worker, then wait for them
    ///
    /// Agents finish their current batch first. Returns false if anything
    /// was still running when `timeout` expired.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        info!("Stopping pipeline");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = self.queue.shutdown(timeout).await;

        for (name, handle) in self.handles.drain(..) {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(agent = name, error = %e, "Agent task panicked"),
                Err(_) => {
                    warn!(agent = name, "Agent did not stop in time");
                    clean = false;
                }
            }
        }

        info!(clean, "Pipeline stopped");
        clean
    }
}
