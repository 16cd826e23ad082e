//! Full text extraction: transcript to readable paragraphs
//!
//! The SRT transcript is flattened to plain text (`<id>.<lang>.txt`), then
//! reflowed into paragraphs chunk by chunk with the text model
//! (`<id>.<lang>.processed.txt`). The last paragraph of every reflowed chunk
//! is carried into the next prompt so paragraphs are not cut at chunk
//! boundaries.

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};
use tubeflow_common::config::LlmTaskConfig;

use super::artifacts::ArtifactStore;
use super::llm_client::LlmClient;
use super::srt::plain_text;
use super::{StageArtifact, TextExtractor};
use crate::error::StageError;
use crate::models::{Stage, WorkItem};

/// Languages chunked by character instead of by word
fn is_cjk(language: &str) -> bool {
    matches!(language, "zh" | "ja" | "ko") || language.starts_with("zh-")
}

/// Split text into overlapping chunks of `chunk_size` words (characters for CJK)
pub fn chunk_text(text: &str, language: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let cjk = is_cjk(language);
    let units: Vec<String> = if cjk {
        text.chars().filter(|c| !c.is_whitespace()).map(String::from).collect()
    } else {
        text.split_whitespace().map(String::from).collect()
    };
    if units.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let step = if overlap < chunk_size { chunk_size - overlap } else { chunk_size };
    let separator = if cjk { "" } else { " " };

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(units.len());
        chunks.push(units[start..end].join(separator));
        if end == units.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Split off the last paragraph (blank-line separated, else line separated)
pub fn split_last_paragraph(text: &str) -> (&str, &str) {
    let text = text.trim();
    if let Some((body, last)) = text.rsplit_once("\n\n") {
        return (body.trim_end(), last.trim());
    }
    if let Some((body, last)) = text.rsplit_once('\n') {
        return (body.trim_end(), last.trim());
    }
    ("", text)
}

fn reflow_prompt(chunk: &str, carried: &str, language: &str) -> String {
    let mut prompt = format!(
        "The following is part of an automatically generated transcript in language '{}'. \
         Rewrite it as well-formed paragraphs separated by blank lines. Fix punctuation and \
         obvious recognition errors, but do not summarize, translate or add content. \
         Reply with the rewritten text only.\n\n",
        language
    );
    if !carried.is_empty() {
        prompt.push_str(
            "Begin your answer with this paragraph, continued by the new text:\n<previous>\n",
        );
        prompt.push_str(carried);
        prompt.push_str("\n</previous>\n\n");
    }
    prompt.push_str("<transcript>\n");
    prompt.push_str(chunk);
    prompt.push_str("\n</transcript>");
    prompt
}

/// Text extractor backed by the text model, or plain text without one
pub struct LlmTextExtractor {
    artifacts: ArtifactStore,
    llm: Option<(LlmClient, LlmTaskConfig)>,
    chunk_size: usize,
    overlap: usize,
}

impl LlmTextExtractor {
    /// Without a client or a configured model the plain text is kept as is
    pub fn new(artifacts: ArtifactStore, llm: Option<LlmClient>, task: LlmTaskConfig) -> Self {
        let llm = match (llm, task.model.is_some()) {
            (Some(client), true) => Some((client, task)),
            _ => None,
        };
        Self {
            artifacts,
            llm,
            chunk_size: 2000,
            overlap: 200,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    async fn reflow(&self, client: &LlmClient, task: &LlmTaskConfig, text: &str, language: &str) -> anyhow::Result<String> {
        let chunks = chunk_text(text, language, self.chunk_size, self.overlap);
        let total = chunks.len();

        let mut paragraphs: Vec<String> = Vec::new();
        let mut carried = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            debug!(chunk = i + 1, total, "Reflowing transcript chunk");
            let result = client
                .complete(task, &reflow_prompt(chunk, &carried, language))
                .await
                .with_context(|| format!("Reflow of chunk {}/{} failed", i + 1, total))?;

            let (body, last) = split_last_paragraph(&result);
            if !body.is_empty() {
                paragraphs.push(body.to_string());
            }
            carried = last.to_string();
        }
        if !carried.is_empty() {
            paragraphs.push(carried);
        }
        Ok(paragraphs.join("\n\n"))
    }
}

#[async_trait]
impl TextExtractor for LlmTextExtractor {
    async fn extract(&self, item: &WorkItem) -> Result<StageArtifact, StageError> {
        let id = item.source_id.as_str();
        let (srt_path, language) = self
            .artifacts
            .find_transcript(id, item.language.as_deref())
            .await?
            .ok_or_else(|| StageError::missing(Stage::Transcribe, format!("no transcript for {}", id)))?;

        let srt = tokio::fs::read_to_string(&srt_path).await?;
        let text = plain_text(&srt);
        if text.trim().is_empty() {
            return Err(StageError::missing(
                Stage::Transcribe,
                format!("transcript {} has no text", srt_path.display()),
            ));
        }
        self.artifacts
            .write_atomic(&self.artifacts.text_path(id, &language), &text)
            .await?;

        let processed = match &self.llm {
            Some((client, task)) => self.reflow(client, task, &text, &language).await?,
            None => {
                info!(source_id = id, "No text model configured, keeping plain transcript text");
                text
            }
        };
        if processed.trim().is_empty() {
            return Err(StageError::Failed(anyhow::anyhow!("reflowed text for {} is empty", id)));
        }

        let path = self.artifacts.processed_text_path(id, &language);
        self.artifacts.write_atomic(&path, &processed).await?;
        Ok(StageArtifact { path, language })
    }
}
