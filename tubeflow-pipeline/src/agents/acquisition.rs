//! Acquisition stage
//!
//! Consumer side of the Submission Queue, and the stage agent that discovers
//! new uploads on watched channels and re-acquires rows whose media was
//! never recorded. Downloads from both paths are serialized.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tubeflow_common::events::{EventBus, PipelineEvent};

use super::{Dispatch, StageProcessor};
use crate::db::ItemStore;
use crate::error::StageError;
use crate::models::{AcquiredMetadata, ItemPatch, QueueEntry, Stage, SubmitOptions, WorkItem};
use crate::queue::{EntryProcessor, SubmissionQueue};
use crate::services::srt::clean_srt;
use crate::services::{Acquirer, SourceDiscovery};

struct Discovery {
    source: Arc<dyn SourceDiscovery>,
    channels: Vec<String>,
    max_results: u32,
}

pub struct AcquisitionProcessor {
    store: ItemStore,
    queue: Arc<SubmissionQueue>,
    acquirer: Arc<dyn Acquirer>,
    discovery: Option<Discovery>,
    event_bus: EventBus,
    download_lock: Mutex<()>,
}

impl AcquisitionProcessor {
    pub fn new(
        store: ItemStore,
        queue: Arc<SubmissionQueue>,
        acquirer: Arc<dyn Acquirer>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            queue,
            acquirer,
            discovery: None,
            event_bus,
            download_lock: Mutex::new(()),
        }
    }

    /// Watch `channels` for new uploads on every acquisition cycle
    pub fn with_discovery(
        mut self,
        source: Arc<dyn SourceDiscovery>,
        channels: Vec<String>,
        max_results: u32,
    ) -> Self {
        self.discovery = Some(Discovery {
            source,
            channels,
            max_results,
        });
        self
    }

    /// Submit uploads not yet known to the store; returns how many were queued
    pub async fn discover(&self) -> anyhow::Result<usize> {
        let Some(discovery) = &self.discovery else {
            return Ok(0);
        };

        let mut queued = 0;
        for channel in &discovery.channels {
            let ids = match discovery.source.list_recent(channel, discovery.max_results).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Discovery failed");
                    continue;
                }
            };

            for id in ids {
                if self.store.get_one(&id).await?.is_some() {
                    continue;
                }
                if self.queue.submit(&id, SubmitOptions::default()) {
                    queued += 1;
                }
            }
        }

        if queued > 0 {
            info!(queued, "Discovered new uploads");
        }
        Ok(queued)
    }

    async fn fetch(&self, source_id: &str) -> anyhow::Result<AcquiredMetadata> {
        let _download = self.download_lock.lock().await;
        let mut metadata = self.acquirer.acquire(source_id).await?;
        if metadata.source_id != source_id {
            if !metadata.source_id.is_empty() {
                warn!(source_id, reported = %metadata.source_id, "Acquirer reported a different id");
            }
            metadata.source_id = source_id.to_string();
        }
        Ok(metadata)
    }

    /// Download `source_id` and record it in the store
    pub async fn acquire_and_record(
        &self,
        source_id: &str,
        options: &SubmitOptions,
    ) -> anyhow::Result<WorkItem> {
        if options.force {
            let removed = self
                .store
                .clear_for_reprocess(source_id)
                .await
                .context("Failed to reset item for reprocess")?;
            debug!(source_id, removed, "Forced reprocess, removed derived artifacts");
        }

        let metadata = self.fetch(source_id).await?;
        let (item, created) = self
            .store
            .record_acquisition(&metadata, options)
            .await
            .context("Failed to record acquisition")?;
        info!(source_id, created, title = %item.title, "Work item acquired");

        self.event_bus.emit_lossy(PipelineEvent::ItemAcquired {
            source_id: source_id.to_string(),
            title: item.title.clone(),
            timestamp: Utc::now(),
        });

        let item = self.adopt_platform_subtitles(item).await?;
        Ok(item)
    }

    /// Use subtitles downloaded with the media as the transcript
    async fn adopt_platform_subtitles(&self, item: WorkItem) -> anyhow::Result<WorkItem> {
        let Some(language) = self.platform_transcript(&item, item.language.as_deref()).await? else {
            return Ok(item);
        };

        let patch = ItemPatch::completed(Stage::Transcribe).with_language(language.as_str());
        let item = self.store.update(&item.source_id, &patch).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            source_id: item.source_id.clone(),
            stage: Stage::Transcribe.to_string(),
            timestamp: Utc::now(),
        });
        Ok(item)
    }

    /// Clean downloaded subtitles in place; returns their language when they
    /// can stand in for the transcript
    async fn platform_transcript(
        &self,
        item: &WorkItem,
        preferred_lang: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        if item.transcribed || item.run_until < Stage::Transcribe {
            return Ok(None);
        }

        let artifacts = self.store.artifacts();
        let Some((path, language)) = artifacts
            .find_transcript(&item.source_id, preferred_lang)
            .await?
        else {
            return Ok(None);
        };

        let cleaned = clean_srt(&tokio::fs::read_to_string(&path).await?);
        if cleaned.trim().is_empty() {
            debug!(source_id = %item.source_id, "Platform subtitles empty after cleaning");
            return Ok(None);
        }
        artifacts.write_atomic(&path, &cleaned).await?;

        info!(source_id = %item.source_id, language = %language, "Using platform subtitles as transcript");
        Ok(Some(language))
    }
}

#[async_trait]
impl EntryProcessor for AcquisitionProcessor {
    async fn process_entry(&self, entry: QueueEntry) -> anyhow::Result<()> {
        self.acquire_and_record(&entry.source_id, &entry.options).await?;
        Ok(())
    }
}

#[async_trait]
impl StageProcessor for AcquisitionProcessor {
    fn name(&self) -> &'static str {
        "acquisition"
    }

    fn stage(&self) -> Stage {
        Stage::Acquire
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Serial
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.discover().await?;
        Ok(())
    }

    async fn process(&self, item: WorkItem) -> Result<ItemPatch, StageError> {
        let metadata = self.fetch(&item.source_id).await?;
        let preferred = metadata.language.as_deref().or(item.language.as_deref());
        let subtitles = self.platform_transcript(&item, preferred).await?;

        let mut patch = ItemPatch {
            title: Some(metadata.title),
            channel_id: Some(metadata.channel_id),
            channel: Some(metadata.channel),
            published_at: metadata.published_at,
            language: metadata.language,
            ..ItemPatch::default()
        };
        if let Some(language) = subtitles {
            patch = patch.with_flag(Stage::Transcribe, true).with_language(language);
        }
        Ok(patch)
    }
}
