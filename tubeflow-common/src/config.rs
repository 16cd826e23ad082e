//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TUBEFLOW_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and every
//! section falls back to its defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TUBEFLOW_ROOT_FOLDER";
/// Environment variable pointing at an explicit config file
pub const CONFIG_FILE_ENV: &str = "TUBEFLOW_CONFIG";
/// Environment variable overriding `discovery.youtube_api_key`
pub const YOUTUBE_API_KEY_ENV: &str = "TUBEFLOW_YOUTUBE_API_KEY";
/// Environment variable overriding `llm.api_key`
pub const LLM_API_KEY_ENV: &str = "TUBEFLOW_LLM_API_KEY";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "tubeflow.db";
/// Artifact directory name inside the root folder
pub const DOWNLOADS_DIR: &str = "downloads";

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub port: u16,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/tubeflow (or /var/lib/tubeflow for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("tubeflow"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/tubeflow"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("tubeflow"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tubeflow"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("tubeflow"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tubeflow"))
        } else {
            PathBuf::from("./tubeflow_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            port: 5780,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: CompiledDefaults::for_current_platform().port,
        }
    }
}

/// `[agents]` section: pacing of every agent loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub acquisition_poll_secs: u64,
    pub transcription_poll_secs: u64,
    pub text_poll_secs: u64,
    pub summary_poll_secs: u64,
    /// Submission queue worker sleep while the pending list is empty
    pub queue_idle_millis: u64,
    pub shutdown_timeout_secs: u64,
    /// Upper bound on retrying a store write blocked by SQLite lock contention
    pub max_lock_wait_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            acquisition_poll_secs: 60,
            transcription_poll_secs: 30,
            text_poll_secs: 30,
            summary_poll_secs: 30,
            queue_idle_millis: 500,
            shutdown_timeout_secs: 30,
            max_lock_wait_ms: 5000,
        }
    }
}

/// `[discovery]` section: channels watched for new uploads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Channel ids (`UC...`) or handles (`@name`)
    pub channels: Vec<String>,
    pub max_results: u32,
    pub youtube_api_key: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            max_results: 10,
            youtube_api_key: None,
        }
    }
}

/// `[acquisition]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Downloader executable (yt-dlp compatible command line)
    pub downloader: String,
    pub format: String,
    pub subtitle_langs: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            downloader: "yt-dlp".to_string(),
            format: "worst".to_string(),
            subtitle_langs: vec!["en".to_string(), "zh".to_string()],
        }
    }
}

/// `[transcription]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whisper-compatible command line executable
    pub command: String,
    pub model: String,
    pub device: Option<String>,
    /// Keep downloaded media after a successful transcription
    pub keep_media: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            command: "whisper".to_string(),
            model: "base".to_string(),
            device: None,
            keep_media: false,
        }
    }
}

/// Per-task language model settings (`[llm.text]`, `[llm.summary]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmTaskConfig {
    /// Model name; the task runs without a model when unset
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmTaskConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: 0.3,
        }
    }
}

/// `[llm]` section: OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Transcript chunk size (words, or characters for CJK text)
    pub text_chunk_size: usize,
    pub text_chunk_overlap: usize,
    pub text: LlmTaskConfig,
    pub summary: LlmTaskConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            text_chunk_size: 2000,
            text_chunk_overlap: 200,
            text: LlmTaskConfig::default(),
            summary: LlmTaskConfig::default(),
        }
    }
}

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub agents: AgentsConfig,
    pub discovery: DiscoveryConfig,
    pub acquisition: AcquisitionConfig,
    pub transcription: TranscriptionConfig,
    pub llm: LlmConfig,
}

impl TomlConfig {
    /// Apply environment overrides for secrets
    ///
    /// Environment wins over TOML; both being set is logged since it usually
    /// means a stale value in one of them.
    pub fn apply_env_overrides(&mut self) {
        self.discovery.youtube_api_key = resolve_secret(
            "YouTube API key",
            std::env::var(YOUTUBE_API_KEY_ENV).ok(),
            self.discovery.youtube_api_key.take(),
        );
        self.llm.api_key = resolve_secret(
            "LLM API key",
            std::env::var(LLM_API_KEY_ENV).ok(),
            self.llm.api_key.take(),
        );
    }
}

/// Validate a secret (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn resolve_secret(label: &str, env_value: Option<String>, toml_value: Option<String>) -> Option<String> {
    let env_value = env_value.filter(|k| is_valid_key(k));
    let toml_value = toml_value.filter(|k| is_valid_key(k));

    match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!("{} found in environment and TOML. Using environment.", label);
            Some(env)
        }
        (Some(env), None) => {
            info!("{} loaded from environment variable", label);
            Some(env)
        }
        (None, Some(toml)) => {
            info!("{} loaded from TOML config", label);
            Some(toml)
        }
        (None, None) => None,
    }
}

/// Default config file location (`~/.config/tubeflow/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tubeflow").join("config.toml"))
}

/// Load the TOML configuration
///
/// An explicitly requested file must exist. When no path is given the
/// `TUBEFLOW_CONFIG` variable and then the default location are tried; if
/// neither yields a file the defaults are returned.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => {
            let candidate = std::env::var(CONFIG_FILE_ENV)
                .ok()
                .map(PathBuf::from)
                .or_else(default_config_path);

            match candidate {
                Some(path) if path.exists() => path,
                _ => {
                    warn!("No config file found, using defaults");
                    return Ok(TomlConfig::default());
                }
            }
        }
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write the TOML configuration atomically (temp file + rename)
///
/// The file holds API keys, so on Unix it is restricted to the owner.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}

/// Resolves the root folder from CLI, environment, TOML and defaults
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML: {}", path.display());
            return path.clone();
        }

        let default = CompiledDefaults::for_current_platform().root_folder;
        info!(module = %self.module_name, "Root folder from compiled default: {}", default.display());
        default
    }
}

/// Creates the root folder layout on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and the downloads directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.downloads_path())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn downloads_path(&self) -> PathBuf {
        self.root_folder.join(DOWNLOADS_DIR)
    }
}
