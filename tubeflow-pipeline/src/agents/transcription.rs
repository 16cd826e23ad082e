//! Transcription stage
//!
//! Holds the transcription model, an exclusive and memory-heavy resource.
//! The model is loaded before a non-empty batch, items are transcribed one
//! at a time, and the model is dropped once the batch is drained.

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Dispatch, StageProcessor};
use crate::error::StageError;
use crate::models::{ItemPatch, Stage, WorkItem};
use crate::services::artifacts::{is_non_empty, ArtifactStore};
use crate::services::srt::render_srt;
use crate::services::{Acquirer, TranscriptionBackend, TranscriptionModel};

pub struct TranscriptionProcessor {
    backend: Arc<dyn TranscriptionBackend>,
    model: Mutex<Option<Arc<dyn TranscriptionModel>>>,
    acquirer: Arc<dyn Acquirer>,
    artifacts: ArtifactStore,
    keep_media: bool,
}

impl TranscriptionProcessor {
    /// `acquirer` re-fetches media that went missing before transcription
    pub fn new(
        backend: Arc<dyn TranscriptionBackend>,
        acquirer: Arc<dyn Acquirer>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            backend,
            model: Mutex::new(None),
            acquirer,
            artifacts,
            keep_media: false,
        }
    }

    pub fn keep_media(mut self, keep_media: bool) -> Self {
        self.keep_media = keep_media;
        self
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.lock().await.is_some()
    }
}

#[async_trait]
impl StageProcessor for TranscriptionProcessor {
    fn name(&self) -> &'static str {
        "transcription"
    }

    fn stage(&self) -> Stage {
        Stage::Transcribe
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Serial
    }

    async fn acquire_resources(&self) -> Result<(), StageError> {
        let mut model = self.model.lock().await;
        if model.is_none() {
            let loaded = self
                .backend
                .load()
                .await
                .map_err(|e| StageError::Resource(format!("{:#}", e)))?;
            *model = Some(loaded);
        }
        Ok(())
    }

    async fn release_resources(&self) {
        if self.model.lock().await.take().is_some() {
            info!("Transcription model released");
        }
    }

    async fn process(&self, item: WorkItem) -> Result<ItemPatch, StageError> {
        let id = item.source_id.as_str();
        let media = self.artifacts.media_path(id);

        if !is_non_empty(&media).await {
            warn!(source_id = id, "Media missing, fetching it again");
            self.acquirer.acquire(id).await?;
            if !is_non_empty(&media).await {
                return Err(anyhow!("media for {} unavailable after re-fetch", id).into());
            }
        }

        let model = self
            .model
            .lock()
            .await
            .clone()
            .ok_or_else(|| StageError::Resource("transcription model not loaded".to_string()))?;

        let input = media.clone();
        let transcript = tokio::task::spawn_blocking(move || model.transcribe(&input))
            .await
            .map_err(|e| anyhow!("transcription task failed: {}", e))??;

        if transcript.is_empty() {
            return Err(anyhow!("empty transcript for {}", id).into());
        }

        let path = self.artifacts.transcript_path(id, &transcript.language);
        self.artifacts
            .write_atomic(&path, &render_srt(&transcript.segments))
            .await?;

        if !self.keep_media {
            if let Err(e) = tokio::fs::remove_file(&media).await {
                warn!(source_id = id, error = %e, "Failed to remove transcribed media");
            }
        }

        Ok(ItemPatch::default().with_language(transcript.language))
    }
}
