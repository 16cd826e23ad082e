//! End-to-end pipeline tests: submission queue, acquisition, stage
//! progression and the Pipeline Manager lifecycle

mod helpers;

use async_trait::async_trait;
use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tubeflow_pipeline::agents::{
    AcquisitionProcessor, StageAgent, SummarizationProcessor, TextExtractionProcessor,
    TranscriptionProcessor,
};
use tubeflow_pipeline::config::PipelineSettings;
use tubeflow_pipeline::models::{QueueStatus, Stage, SubmitOptions};
use tubeflow_pipeline::queue::SubmissionQueue;
use tubeflow_pipeline::services::SourceDiscovery;
use tubeflow_pipeline::{Collaborators, PipelineManager};

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(50);

fn queue() -> Arc<SubmissionQueue> {
    Arc::new(SubmissionQueue::new(Duration::from_millis(20)))
}

fn acquisition(env: &TestEnv, queue: &Arc<SubmissionQueue>, acquirer: Arc<FakeAcquirer>) -> Arc<AcquisitionProcessor> {
    Arc::new(AcquisitionProcessor::new(
        env.store.clone(),
        Arc::clone(queue),
        acquirer,
        env.event_bus.clone(),
    ))
}

async fn wait_for_status(queue: &SubmissionQueue, source_id: &str, status: QueueStatus) -> bool {
    wait_for(WAIT, move || async move { queue.status(source_id) == Some(status) }).await
}

#[tokio::test]
async fn test_submitted_item_is_acquired_and_recorded() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()));
    let processor = acquisition(&env, &queue, acquirer.clone());

    assert!(queue.submit("abc123", SubmitOptions::default()));
    assert_eq!(queue.status("abc123"), Some(QueueStatus::Queued));

    assert!(queue.start_worker(processor).await);
    assert!(wait_for_status(&queue, "abc123", QueueStatus::Completed).await);

    let item = env.store.get_one("abc123").await.unwrap().unwrap();
    assert!(item.acquired);
    assert!(!item.transcribed);
    assert_eq!(item.title, "Title of abc123");
    assert!(env.artifacts().media_path("abc123").exists());
    assert_eq!(acquirer.calls(), 1);

    assert!(queue.shutdown(WAIT).await);
}

#[tokio::test]
async fn test_resubmission_while_in_flight_is_rejected() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()).with_delay(Duration::from_millis(300)));
    let processor = acquisition(&env, &queue, acquirer.clone());
    queue.start_worker(processor).await;

    assert!(queue.submit("abc123", SubmitOptions::default()));
    assert!(wait_for_status(&queue, "abc123", QueueStatus::Processing).await);
    assert!(!queue.submit("abc123", SubmitOptions::default()));

    assert!(wait_for_status(&queue, "abc123", QueueStatus::Completed).await);
    assert_eq!(acquirer.calls(), 1);

    // Finished submissions may be queued again
    assert!(queue.submit("abc123", SubmitOptions::default()));
    assert!(queue.shutdown(WAIT).await);
}

#[tokio::test]
async fn test_failed_acquisition_reports_error_and_worker_continues() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()).failing("broken"));
    let processor = acquisition(&env, &queue, acquirer);
    queue.start_worker(processor).await;

    queue.submit("broken", SubmitOptions::default());
    queue.submit("abc123", SubmitOptions::default());

    assert!(wait_for_status(&queue, "abc123", QueueStatus::Completed).await);
    assert_eq!(queue.status("broken"), Some(QueueStatus::Error));
    assert!(env.store.get_one("broken").await.unwrap().is_none());
    assert!(queue.shutdown(WAIT).await);
}

#[tokio::test]
async fn test_downloads_are_serialized() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()).with_delay(Duration::from_millis(50)));
    let processor = acquisition(&env, &queue, acquirer.clone());

    let mut tasks = tokio::task::JoinSet::new();
    for id in ["abc123", "def456", "ghi789"] {
        let processor = Arc::clone(&processor);
        tasks.spawn(async move {
            processor
                .acquire_and_record(id, &SubmitOptions::default())
                .await
                .unwrap()
        });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.unwrap().acquired);
    }

    assert_eq!(acquirer.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_platform_subtitles_become_the_transcript() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()));
    let processor = acquisition(&env, &queue, acquirer);

    // Subtitles fetched alongside the media
    write_transcript(env.artifacts(), "abc123").await;

    let item = processor
        .acquire_and_record("abc123", &SubmitOptions::default())
        .await
        .unwrap();

    assert!(item.acquired);
    assert!(item.transcribed);
    assert_eq!(item.language.as_deref(), Some("en"));
}

#[tokio::test]
async fn test_forced_resubmission_reprocesses_item() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()));
    let processor = acquisition(&env, &queue, acquirer);

    seed_item(&env.store, "abc123", Some(Stage::Summarize)).await;
    let artifacts = env.artifacts();
    artifacts
        .write_atomic(&artifacts.processed_text_path("abc123", "en"), "text")
        .await
        .unwrap();
    artifacts
        .write_atomic(&artifacts.summary_path("abc123", "en"), "# Summary")
        .await
        .unwrap();

    let options = SubmitOptions {
        force: true,
        ..SubmitOptions::default()
    };
    let item = processor.acquire_and_record("abc123", &options).await.unwrap();

    assert!(item.acquired);
    assert!(!item.transcribed);
    assert!(!item.text_extracted);
    assert!(!item.summarized);
    assert!(!artifacts.summary_path("abc123", "en").exists());
    assert!(artifacts.media_path("abc123").exists());
}

#[tokio::test]
async fn test_failed_forced_download_leaves_no_stale_flags() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()).failing("abc123"));
    let processor = acquisition(&env, &queue, acquirer.clone());

    seed_item(&env.store, "abc123", Some(Stage::Summarize)).await;
    let artifacts = env.artifacts();
    artifacts
        .write_atomic(&artifacts.media_path("abc123"), "fake media")
        .await
        .unwrap();
    write_transcript(artifacts, "abc123").await;
    artifacts
        .write_atomic(&artifacts.processed_text_path("abc123", "en"), "text")
        .await
        .unwrap();
    artifacts
        .write_atomic(&artifacts.summary_path("abc123", "en"), "# Summary")
        .await
        .unwrap();

    let options = SubmitOptions {
        force: true,
        ..SubmitOptions::default()
    };
    assert!(processor.acquire_and_record("abc123", &options).await.is_err());
    assert_eq!(acquirer.calls(), 1);

    let item = env.store.get_one("abc123").await.unwrap().unwrap();
    assert!(item.acquired);
    assert!(!item.transcribed);
    assert!(!item.text_extracted);
    assert!(!item.summarized);
    for stage in Stage::ALL.into_iter().filter(|s| item.flag(*s)) {
        assert!(
            artifacts.stage_artifact(stage, &item).await.unwrap().is_some(),
            "{} is flagged without its artifact",
            stage
        );
    }
    assert!(!artifacts.summary_path("abc123", "en").exists());

    let eligible = env.store.get(&Stage::Transcribe.eligibility()).await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].source_id, "abc123");
}

struct FakeDiscovery(Vec<&'static str>);

#[async_trait]
impl SourceDiscovery for FakeDiscovery {
    async fn list_recent(&self, _source_ref: &str, max_results: u32) -> anyhow::Result<Vec<String>> {
        Ok(self.0.iter().take(max_results as usize).map(|s| s.to_string()).collect())
    }
}

#[tokio::test]
async fn test_discovery_queues_only_unknown_uploads() {
    let env = test_env().await;
    let queue = queue();
    let acquirer = Arc::new(FakeAcquirer::new(env.artifacts().clone()));
    seed_item(&env.store, "known1", Some(Stage::Acquire)).await;

    let processor = AcquisitionProcessor::new(env.store.clone(), Arc::clone(&queue), acquirer, env.event_bus.clone())
        .with_discovery(
            Arc::new(FakeDiscovery(vec!["known1", "new1", "new2"])),
            vec!["UCfake".to_string()],
            10,
        );

    assert_eq!(processor.discover().await.unwrap(), 2);
    assert_eq!(queue.status("new1"), Some(QueueStatus::Queued));
    assert_eq!(queue.status("known1"), None);

    // Already queued ids are not counted twice
    assert_eq!(processor.discover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stage_progression_one_batch_per_stage() {
    let env = test_env().await;
    seed_item(&env.store, "abc123", Some(Stage::Acquire)).await;
    let artifacts = env.artifacts().clone();
    let acquirer = Arc::new(FakeAcquirer::new(artifacts.clone()));
    artifacts
        .write_atomic(&artifacts.media_path("abc123"), "fake media")
        .await
        .unwrap();

    let transcription = StageAgent::new(
        Arc::new(TranscriptionProcessor::new(
            Arc::new(FakeTranscriptionBackend::default()),
            acquirer,
            artifacts.clone(),
        )),
        env.store.clone(),
        env.event_bus.clone(),
        POLL,
    );
    let text = StageAgent::new(
        Arc::new(TextExtractionProcessor::new(Arc::new(FakeTextExtractor::new(artifacts.clone())))),
        env.store.clone(),
        env.event_bus.clone(),
        POLL,
    );
    let summary = StageAgent::new(
        Arc::new(SummarizationProcessor::new(Arc::new(FakeSummarizer::new(artifacts.clone())))),
        env.store.clone(),
        env.event_bus.clone(),
        POLL,
    );

    // Out of order: nothing is eligible yet for the later stages
    assert_eq!(summary.process_batch().await.unwrap().eligible, 0);
    assert_eq!(text.process_batch().await.unwrap().eligible, 0);

    transcription.process_batch().await.unwrap();
    assert!(env.store.get_one("abc123").await.unwrap().unwrap().transcribed);

    text.process_batch().await.unwrap();
    assert!(env.store.get_one("abc123").await.unwrap().unwrap().text_extracted);

    summary.process_batch().await.unwrap();
    let item = env.store.get_one("abc123").await.unwrap().unwrap();
    assert!(item.summarized);
    assert!(item.is_complete());
}

fn collaborators(env: &TestEnv) -> (Collaborators, Arc<FakeTranscriptionBackend>) {
    let artifacts = env.artifacts().clone();
    let backend = Arc::new(FakeTranscriptionBackend::default());
    let collaborators = Collaborators {
        discovery: None,
        acquirer: Arc::new(FakeAcquirer::new(artifacts.clone())),
        transcription: backend.clone(),
        text_extractor: Arc::new(FakeTextExtractor::new(artifacts.clone())),
        summarizer: Arc::new(FakeSummarizer::new(artifacts)),
    };
    (collaborators, backend)
}

#[tokio::test]
async fn test_manager_runs_submission_to_summary() {
    let env = test_env().await;
    let settings = PipelineSettings::default().with_poll_interval(POLL);
    let (collaborators, backend) = collaborators(&env);
    let mut manager = PipelineManager::assemble(env.store.clone(), env.event_bus.clone(), &settings, collaborators);

    assert_eq!(
        manager.agent_names(),
        vec!["acquisition", "transcription", "text_extraction", "summarization"]
    );

    manager.start().await.unwrap();
    assert!(manager.is_running());
    assert!(manager.queue().submit("abc123", SubmitOptions::default()));

    let store = env.store.clone();
    let finished = wait_for(WAIT, || {
        let store = store.clone();
        async move {
            store
                .get_one("abc123")
                .await
                .unwrap()
                .is_some_and(|item| item.is_complete())
        }
    })
    .await;
    assert!(finished, "item should reach summarized");

    assert!(manager.stop(settings.shutdown_timeout).await);
    assert!(!manager.is_running());
    assert!(backend.loads() >= 1);
    assert_eq!(backend.live_models(), 0);

    // No intake after stop
    assert!(!manager.queue().submit("def456", SubmitOptions::default()));
}

#[tokio::test]
async fn test_run_until_stops_item_early() {
    let env = test_env().await;
    let settings = PipelineSettings::default().with_poll_interval(POLL);
    let (collaborators, backend) = collaborators(&env);
    let mut manager = PipelineManager::assemble(env.store.clone(), env.event_bus.clone(), &settings, collaborators);
    manager.start().await.unwrap();

    let options = SubmitOptions {
        force: false,
        run_until: Stage::Acquire,
    };
    manager.queue().submit("abc123", options);
    assert!(wait_for_status(manager.queue(), "abc123", QueueStatus::Completed).await);

    // Give the other agents a few cycles to (not) pick it up
    tokio::time::sleep(POLL * 4).await;
    let item = env.store.get_one("abc123").await.unwrap().unwrap();
    assert!(item.acquired);
    assert!(!item.transcribed);
    assert_eq!(backend.loads(), 0);

    assert!(manager.stop(settings.shutdown_timeout).await);
}
