//! Pipeline settings resolved from the TOML configuration

use std::time::Duration;
use tracing::warn;
use tubeflow_common::config::TomlConfig;

/// Agent pacing and stage options
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub acquisition_poll: Duration,
    pub transcription_poll: Duration,
    pub text_poll: Duration,
    pub summary_poll: Duration,
    pub queue_idle: Duration,
    pub shutdown_timeout: Duration,
    pub max_lock_wait_ms: u64,
    pub channels: Vec<String>,
    pub max_results: u32,
    pub keep_media: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}

/// Zero intervals would turn a poll loop into a busy loop
fn non_zero_secs(name: &str, secs: u64) -> Duration {
    if secs == 0 {
        warn!("{} is 0, using 1 second", name);
        Duration::from_secs(1)
    } else {
        Duration::from_secs(secs)
    }
}

impl PipelineSettings {
    pub fn from_toml(config: &TomlConfig) -> Self {
        let agents = &config.agents;
        Self {
            acquisition_poll: non_zero_secs("agents.acquisition_poll_secs", agents.acquisition_poll_secs),
            transcription_poll: non_zero_secs("agents.transcription_poll_secs", agents.transcription_poll_secs),
            text_poll: non_zero_secs("agents.text_poll_secs", agents.text_poll_secs),
            summary_poll: non_zero_secs("agents.summary_poll_secs", agents.summary_poll_secs),
            queue_idle: Duration::from_millis(agents.queue_idle_millis.max(10)),
            shutdown_timeout: Duration::from_secs(agents.shutdown_timeout_secs),
            max_lock_wait_ms: agents.max_lock_wait_ms,
            channels: config.discovery.channels.clone(),
            max_results: config.discovery.max_results.clamp(1, 50),
            keep_media: config.transcription.keep_media,
        }
    }

    /// Same interval for every agent (tests and one-shot runs)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.acquisition_poll = interval;
        self.transcription_poll = interval;
        self.text_poll = interval;
        self.summary_poll = interval;
        self
    }
}
