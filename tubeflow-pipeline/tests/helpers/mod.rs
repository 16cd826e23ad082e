//! Shared fixtures for pipeline integration tests
//!
//! Fake collaborators write the same artifacts the production services do,
//! so agents and the store can be exercised without network or models.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tubeflow_common::events::EventBus;

use tubeflow_pipeline::db::ItemStore;
use tubeflow_pipeline::error::StageError;
use tubeflow_pipeline::models::{AcquiredMetadata, Stage, WorkItem};
use tubeflow_pipeline::services::srt::Segment;
use tubeflow_pipeline::services::{
    Acquirer, ArtifactStore, StageArtifact, Summarizer, TextExtractor, Transcript,
    TranscriptionBackend, TranscriptionModel,
};

/// Store backed by an in-memory database and a temporary downloads folder
pub struct TestEnv {
    pub dir: TempDir,
    pub store: ItemStore,
    pub event_bus: EventBus,
}

impl TestEnv {
    pub fn artifacts(&self) -> &ArtifactStore {
        self.store.artifacts()
    }
}

pub async fn test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let pool = tubeflow_common::db::init_memory_database().await.unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("downloads"));
    artifacts.ensure_dir().await.unwrap();
    let store = ItemStore::open(pool, artifacts).await.unwrap();

    TestEnv {
        dir,
        store,
        event_bus: EventBus::new(256),
    }
}

/// Same as [`test_env`] but on a WAL database file with a connection pool
pub async fn file_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let pool = tubeflow_common::db::init_database(&dir.path().join("tubeflow.db"))
        .await
        .unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("downloads"));
    artifacts.ensure_dir().await.unwrap();
    let store = ItemStore::open(pool, artifacts).await.unwrap();

    TestEnv {
        dir,
        store,
        event_bus: EventBus::new(256),
    }
}

/// Insert an item whose flags are true up to and including `through`
pub async fn seed_item(store: &ItemStore, source_id: &str, through: Option<Stage>) -> WorkItem {
    let mut item = WorkItem::new(source_id);
    item.title = format!("Title of {}", source_id);
    item.language = Some("en".to_string());
    if let Some(through) = through {
        for stage in Stage::ALL.into_iter().filter(|s| *s <= through) {
            item.set_flag(stage, true);
        }
    }
    store.upsert(&item).await.unwrap();
    item
}

pub const SAMPLE_SRT: &str = "1\n00:00:00,000 --> 00:00:02,000\nHello there\n\n2\n00:00:02,000 --> 00:00:04,000\ngeneral audience\n\n";

pub async fn write_transcript(artifacts: &ArtifactStore, source_id: &str) {
    artifacts
        .write_atomic(&artifacts.transcript_path(source_id, "en"), SAMPLE_SRT)
        .await
        .unwrap();
}

/// Poll `check` until it holds or `timeout` expires
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Writes an mp4 and info.json for every id; ids in `failing` error out
pub struct FakeAcquirer {
    artifacts: ArtifactStore,
    failing: HashSet<String>,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeAcquirer {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            failing: HashSet::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, source_id: &str) -> Self {
        self.failing.insert(source_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acquirer for FakeAcquirer {
    async fn acquire(&self, source_id: &str) -> anyhow::Result<AcquiredMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = if self.failing.contains(source_id) {
            Err(anyhow::anyhow!("download of {} refused", source_id))
        } else {
            self.artifacts
                .write_atomic(&self.artifacts.media_path(source_id), "fake media")
                .await?;
            self.artifacts
                .write_atomic(&self.artifacts.info_path(source_id), "{}")
                .await?;
            let mut metadata = AcquiredMetadata::new(source_id);
            metadata.title = format!("Title of {}", source_id);
            metadata.channel_id = "UCfake".to_string();
            metadata.channel = "Fake Channel".to_string();
            metadata.language = Some("en".to_string());
            Ok(metadata)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Counts loads and live model handles
#[derive(Default)]
pub struct FakeTranscriptionBackend {
    pub loads: AtomicUsize,
    pub live_models: Arc<AtomicUsize>,
    pub transcribed: Arc<Mutex<Vec<String>>>,
    pub fail_load: AtomicBool,
}

impl FakeTranscriptionBackend {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn live_models(&self) -> usize {
        self.live_models.load(Ordering::SeqCst)
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranscriptionBackend for FakeTranscriptionBackend {
    async fn load(&self) -> anyhow::Result<Arc<dyn TranscriptionModel>> {
        if self.fail_load.load(Ordering::SeqCst) {
            anyhow::bail!("out of memory");
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.live_models.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeModel {
            live_models: Arc::clone(&self.live_models),
            transcribed: Arc::clone(&self.transcribed),
        }))
    }
}

struct FakeModel {
    live_models: Arc<AtomicUsize>,
    transcribed: Arc<Mutex<Vec<String>>>,
}

impl TranscriptionModel for FakeModel {
    fn transcribe(&self, media: &Path) -> anyhow::Result<Transcript> {
        let stem = media
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.transcribed.lock().unwrap().push(stem.clone());
        if stem.starts_with("silent") {
            return Ok(Transcript {
                language: "en".to_string(),
                segments: Vec::new(),
            });
        }
        Ok(Transcript {
            language: "en".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.5,
                text: format!("Spoken words of {}", stem),
            }],
        })
    }
}

impl Drop for FakeModel {
    fn drop(&mut self) {
        self.live_models.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Writes `<id>.en.processed.txt`; ids in `failing` error out
pub struct FakeTextExtractor {
    artifacts: ArtifactStore,
    failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeTextExtractor {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, source_id: &str) -> Self {
        self.failing.insert(source_id.to_string());
        self
    }
}

#[async_trait]
impl TextExtractor for FakeTextExtractor {
    async fn extract(&self, item: &WorkItem) -> Result<StageArtifact, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&item.source_id) {
            return Err(StageError::Failed(anyhow::anyhow!("model timed out")));
        }
        let path = self.artifacts.processed_text_path(&item.source_id, "en");
        self.artifacts.write_atomic(&path, "Readable text.").await?;
        Ok(StageArtifact {
            path,
            language: "en".to_string(),
        })
    }
}

/// Writes `<id>.en.md`
pub struct FakeSummarizer {
    artifacts: ArtifactStore,
    pub calls: AtomicUsize,
}

impl FakeSummarizer {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, item: &WorkItem) -> Result<StageArtifact, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.artifacts.summary_path(&item.source_id, "en");
        self.artifacts.write_atomic(&path, "# Summary\n").await?;
        Ok(StageArtifact {
            path,
            language: "en".to_string(),
        })
    }
}
