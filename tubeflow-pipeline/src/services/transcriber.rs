//! Whisper command line transcription backend

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};
use tubeflow_common::config::TranscriptionConfig;

use super::srt::Segment;
use super::{Transcript, TranscriptionBackend, TranscriptionModel};

/// `--output_format json` result file
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

/// Parse whisper's JSON output
pub fn parse_whisper_output(json: &str) -> Result<Transcript> {
    let output: WhisperOutput = serde_json::from_str(json).context("Invalid whisper output")?;
    Ok(Transcript {
        language: output
            .language
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "en".to_string()),
        segments: output.segments,
    })
}

/// Backend that verifies the whisper executable on load
pub struct WhisperCli {
    config: TranscriptionConfig,
}

impl WhisperCli {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperCli {
    async fn load(&self) -> Result<Arc<dyn TranscriptionModel>> {
        let status = tokio::process::Command::new(&self.config.command)
            .arg("--help")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .with_context(|| format!("Transcription command '{}' not available", self.config.command))?;

        if !status.success() {
            return Err(anyhow!("'{} --help' exited with {}", self.config.command, status));
        }

        info!(command = %self.config.command, model = %self.config.model, "Transcription model loaded");
        Ok(Arc::new(WhisperModel {
            config: self.config.clone(),
        }))
    }
}

struct WhisperModel {
    config: TranscriptionConfig,
}

impl WhisperModel {
    fn work_dir(media: &Path) -> Result<PathBuf> {
        let parent = media
            .parent()
            .ok_or_else(|| anyhow!("Media path has no parent: {}", media.display()))?;
        let stem = media
            .file_stem()
            .ok_or_else(|| anyhow!("Media path has no file name: {}", media.display()))?;
        Ok(parent.join(format!(".whisper-{}", stem.to_string_lossy())))
    }

    fn run(&self, media: &Path, work_dir: &Path) -> Result<Transcript> {
        let mut command = Command::new(&self.config.command);
        command
            .arg(media)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(work_dir)
            .arg("--verbose")
            .arg("False");
        if let Some(device) = &self.config.device {
            command.arg("--device").arg(device);
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to run {}", self.config.command))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                stderr.lines().last().unwrap_or_default()
            ));
        }

        let stem = media.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = work_dir.join(format!("{}.json", stem));
        let json = std::fs::read_to_string(&json_path)
            .with_context(|| format!("Missing whisper output {}", json_path.display()))?;
        parse_whisper_output(&json)
    }
}

impl TranscriptionModel for WhisperModel {
    fn transcribe(&self, media: &Path) -> Result<Transcript> {
        let work_dir = Self::work_dir(media)?;
        std::fs::create_dir_all(&work_dir)?;

        debug!(media = %media.display(), "Running whisper");
        let result = self.run(media, &work_dir);
        let _ = std::fs::remove_dir_all(&work_dir);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whisper_output() {
        let json = r#"{
            "text": " Hello world.",
            "language": "zh",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 2.5, "text": " Hello", "tokens": [1, 2]},
                {"id": 1, "seek": 0, "start": 2.5, "end": 4.0, "text": " world."}
            ]
        }"#;

        let transcript = parse_whisper_output(json).unwrap();

        assert_eq!(transcript.language, "zh");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].end, 4.0);
        assert!(!transcript.is_empty());
    }

    #[test]
    fn test_parse_whisper_output_without_segments() {
        let transcript = parse_whisper_output(r#"{"text": ""}"#).unwrap();
        assert_eq!(transcript.language, "en");
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_work_dir_sits_next_to_media() {
        let dir = WhisperModel::work_dir(Path::new("/data/downloads/abc123.mp4")).unwrap();
        assert_eq!(dir, PathBuf::from("/data/downloads/.whisper-abc123"));
    }
}
