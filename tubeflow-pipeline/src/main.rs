//! tubeflow - media pipeline service
//!
//! Watches channels for new uploads, downloads them, transcribes them,
//! reflows the transcript into readable text and summarizes it. A small HTTP
//! API accepts submissions and reports item state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubeflow_common::config::{
    load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use tubeflow_common::db::init_database;
use tubeflow_common::events::EventBus;

use tubeflow_pipeline::config::PipelineSettings;
use tubeflow_pipeline::db::ItemStore;
use tubeflow_pipeline::services::{
    ArtifactStore, LlmClient, LlmSummarizer, LlmTextExtractor, SourceDiscovery, WhisperCli,
    YoutubeDataClient, YtDlpAcquirer,
};
use tubeflow_pipeline::{AppState, Collaborators, PipelineManager};

/// Command-line arguments for tubeflow
#[derive(Parser, Debug)]
#[command(name = "tubeflow")]
#[command(about = "Media acquisition, transcription and summarization pipeline")]
#[command(version)]
struct Args {
    /// Root folder holding the database and downloads
    #[arg(short, long, env = "TUBEFLOW_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "TUBEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "TUBEFLOW_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut toml_config = load_toml_config(args.config.as_deref())?;

    // Initialize tracing
    let default_filter = format!(
        "tubeflow={level},tubeflow_pipeline={level},tubeflow_common={level},tower_http=info",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tubeflow {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build: {} ({}, {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    toml_config.apply_env_overrides();

    // Step 1: Resolve and create root folder
    let root_folder = RootFolderResolver::new("tubeflow")
        .with_cli_arg(args.root_folder)
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    // Step 2: Open the Item Store; the pipeline cannot run without it
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let settings = PipelineSettings::from_toml(&toml_config);
    let artifacts = ArtifactStore::new(initializer.downloads_path());
    let store = ItemStore::open(pool, artifacts.clone())
        .await
        .context("Failed to initialize item store")?
        .with_max_lock_wait(settings.max_lock_wait_ms);

    // Step 3: Recover flags for artifacts written before the last shutdown
    let recovered = store
        .reconcile_artifacts()
        .await
        .context("Failed to reconcile artifacts")?;
    if recovered > 0 {
        info!(recovered, "Recovered stage flags from existing artifacts");
    }

    // Step 4: Build and start the pipeline
    let event_bus = EventBus::new(256);
    let collaborators = build_collaborators(&toml_config, &artifacts)?;
    let mut manager =
        PipelineManager::assemble(store.clone(), event_bus.clone(), &settings, collaborators);
    manager.start().await.context("Failed to start pipeline")?;

    // Step 5: Serve the API until a shutdown signal arrives
    let state = AppState::new(store, Arc::clone(manager.queue()), event_bus);
    let error_tracker = tubeflow_pipeline::api::track_last_error(&state);
    let app = tubeflow_pipeline::build_router(state);

    let port = args.port.unwrap_or(toml_config.server.port);
    let addr = format!("{}:{}", toml_config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if !manager.stop(settings.shutdown_timeout).await {
        warn!("Some agents were still busy at shutdown");
    }
    error_tracker.abort();

    served.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}

fn build_collaborators(config: &TomlConfig, artifacts: &ArtifactStore) -> Result<Collaborators> {
    let discovery: Option<Arc<dyn SourceDiscovery>> = match (
        config.discovery.channels.is_empty(),
        &config.discovery.youtube_api_key,
    ) {
        (true, _) => None,
        (false, Some(key)) => {
            Some(Arc::new(YoutubeDataClient::new(key.clone())?) as Arc<dyn SourceDiscovery>)
        }
        (false, None) => {
            warn!("Channels configured but no YouTube API key; discovery disabled");
            None
        }
    };

    let llm = LlmClient::new(config.llm.base_url.clone(), config.llm.api_key.clone())?;
    if config.llm.summary.model.is_none() {
        warn!("No [llm.summary] model configured; items will stop before summarization");
    }

    Ok(Collaborators {
        discovery,
        acquirer: Arc::new(YtDlpAcquirer::new(config.acquisition.clone(), artifacts.clone())),
        transcription: Arc::new(WhisperCli::new(config.transcription.clone())),
        text_extractor: Arc::new(
            LlmTextExtractor::new(artifacts.clone(), Some(llm.clone()), config.llm.text.clone())
                .with_chunking(config.llm.text_chunk_size, config.llm.text_chunk_overlap),
        ),
        summarizer: Arc::new(LlmSummarizer::new(
            artifacts.clone(),
            llm,
            config.llm.summary.clone(),
        )),
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
