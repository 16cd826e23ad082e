//! Stage collaborators
//!
//! The traits are the seams the agents depend on; the structs next to them
//! are the production implementations (YouTube Data API, yt-dlp, whisper and
//! an OpenAI-compatible chat endpoint).

pub mod acquirer;
pub mod artifacts;
pub mod discovery;
pub mod llm_client;
pub mod srt;
pub mod summarizer;
pub mod text_extractor;
pub mod transcriber;

pub use acquirer::YtDlpAcquirer;
pub use artifacts::ArtifactStore;
pub use discovery::{extract_video_id, YoutubeDataClient};
pub use llm_client::LlmClient;
pub use summarizer::LlmSummarizer;
pub use text_extractor::LlmTextExtractor;
pub use transcriber::WhisperCli;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StageError;
use crate::models::{AcquiredMetadata, WorkItem};
use srt::Segment;

/// Lists recent items published by a source (channel id or handle)
#[async_trait]
pub trait SourceDiscovery: Send + Sync {
    async fn list_recent(&self, source_ref: &str, max_results: u32) -> anyhow::Result<Vec<String>>;
}

/// Fetches raw media and sidecar metadata; safe to repeat for the same id
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self, source_id: &str) -> anyhow::Result<AcquiredMetadata>;
}

/// Output of one transcription run
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub language: String,
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }
}

/// A loaded transcription model
///
/// Calls block; callers run them on the blocking pool. Dropping the last
/// handle releases the model.
pub trait TranscriptionModel: Send + Sync {
    fn transcribe(&self, media: &Path) -> anyhow::Result<Transcript>;
}

/// Loads the exclusive transcription model
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn load(&self) -> anyhow::Result<Arc<dyn TranscriptionModel>>;
}

/// Artifact written by a text or summary stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageArtifact {
    pub path: PathBuf,
    pub language: String,
}

/// Produces the readable full text of a transcribed item
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, item: &WorkItem) -> Result<StageArtifact, StageError>;
}

/// Produces the summary of an item with extracted text
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, item: &WorkItem) -> Result<StageArtifact, StageError>;
}
