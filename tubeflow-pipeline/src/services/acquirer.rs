//! Media acquisition through a yt-dlp compatible downloader
//!
//! The downloader writes `<id>.mp4`, `<id>.info.json` and, when the platform
//! has them, `<id>.<lang>.srt` subtitles into the artifact directory.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};
use tubeflow_common::config::AcquisitionConfig;

use super::artifacts::ArtifactStore;
use super::Acquirer;
use crate::models::AcquiredMetadata;

/// Subset of the downloader's `.info.json` sidecar
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    /// `YYYYMMDD`
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Parse a `.info.json` sidecar into acquisition metadata
pub fn parse_info_json(json: &str) -> Result<AcquiredMetadata> {
    let info: InfoJson = serde_json::from_str(json).context("Invalid info.json")?;

    let published_at = info
        .upload_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));

    Ok(AcquiredMetadata {
        source_id: info.id,
        title: info.title,
        channel_id: info.channel_id.unwrap_or_default(),
        channel: info.channel.or(info.uploader).unwrap_or_default(),
        published_at,
        language: info.language.filter(|l| !l.is_empty()),
    })
}

/// Runs the downloader as a child process
pub struct YtDlpAcquirer {
    config: AcquisitionConfig,
    artifacts: ArtifactStore,
}

impl YtDlpAcquirer {
    pub fn new(config: AcquisitionConfig, artifacts: ArtifactStore) -> Self {
        Self { config, artifacts }
    }

    fn build_command(&self, source_id: &str) -> Command {
        let output_template = self.artifacts.dir().join("%(id)s.%(ext)s");
        let mut command = Command::new(&self.config.downloader);
        command
            .arg("--no-progress")
            .arg("--format")
            .arg(&self.config.format)
            .arg("--remux-video")
            .arg("mp4")
            .arg("--output")
            .arg(output_template)
            .arg("--write-info-json")
            .arg("--write-subs")
            .arg("--write-auto-subs")
            .arg("--sub-langs")
            .arg(self.config.subtitle_langs.join(","))
            .arg("--convert-subs")
            .arg("srt")
            .arg(format!("https://www.youtube.com/watch?v={}", source_id))
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Acquirer for YtDlpAcquirer {
    async fn acquire(&self, source_id: &str) -> Result<AcquiredMetadata> {
        self.artifacts.ensure_dir().await?;

        info!(source_id, downloader = %self.config.downloader, "Downloading media");
        let output = self
            .build_command(source_id)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.config.downloader))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.config.downloader,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }

        let info_path = self.artifacts.info_path(source_id);
        let json = tokio::fs::read_to_string(&info_path)
            .await
            .with_context(|| format!("Missing sidecar {}", info_path.display()))?;
        let metadata = parse_info_json(&json)?;

        if !super::artifacts::is_non_empty(&self.artifacts.media_path(source_id)).await {
            return Err(anyhow!("Downloader produced no media for {}", source_id));
        }

        debug!(source_id, title = %metadata.title, "Media downloaded");
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_json() {
        let json = r#"{
            "id": "abc123",
            "title": "A talk",
            "channel_id": "UCabcdefghijklmnopqrstuv",
            "uploader": "Some Uploader",
            "upload_date": "20240315",
            "language": "en",
            "duration": 1234
        }"#;

        let metadata = parse_info_json(json).unwrap();

        assert_eq!(metadata.source_id, "abc123");
        assert_eq!(metadata.channel, "Some Uploader");
        assert_eq!(metadata.language.as_deref(), Some("en"));
        assert_eq!(
            metadata.published_at.unwrap().format("%Y-%m-%d").to_string(),
            "2024-03-15"
        );
    }

    #[test]
    fn test_parse_info_json_tolerates_missing_fields() {
        let metadata = parse_info_json(r#"{"id": "abc123", "upload_date": "garbage", "language": ""}"#).unwrap();
        assert!(metadata.published_at.is_none());
        assert!(metadata.language.is_none());
        assert!(metadata.title.is_empty());
    }

    #[test]
    fn test_parse_info_json_requires_id() {
        assert!(parse_info_json(r#"{"title": "no id"}"#).is_err());
    }
}
