//! Summary generation with the summary model

use async_trait::async_trait;
use tubeflow_common::config::LlmTaskConfig;

use super::artifacts::{is_non_empty, ArtifactStore};
use super::llm_client::LlmClient;
use super::{StageArtifact, Summarizer};
use crate::error::StageError;
use crate::models::{Stage, WorkItem};

fn summary_prompt(title: &str, text: &str, language: &str) -> String {
    format!(
        "Summarize the following video transcript in Markdown, in the language '{}'. \
         Start with a one-paragraph overview, then list the key points as bullets.\n\n\
         Title: {}\n\n<transcript>\n{}\n</transcript>",
        language, title, text
    )
}

/// Writes `<id>.<lang>.md` from the reflowed text (plain text as fallback)
pub struct LlmSummarizer {
    artifacts: ArtifactStore,
    client: LlmClient,
    task: LlmTaskConfig,
}

impl LlmSummarizer {
    pub fn new(artifacts: ArtifactStore, client: LlmClient, task: LlmTaskConfig) -> Self {
        Self {
            artifacts,
            client,
            task,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, item: &WorkItem) -> Result<StageArtifact, StageError> {
        if self.task.model.is_none() {
            return Err(StageError::Resource("no summary model configured".to_string()));
        }

        let id = item.source_id.as_str();
        let language = item.language_or_default().to_string();

        let processed = self.artifacts.processed_text_path(id, &language);
        let plain = self.artifacts.text_path(id, &language);
        let source = if is_non_empty(&processed).await {
            processed
        } else if is_non_empty(&plain).await {
            plain
        } else {
            return Err(StageError::missing(
                Stage::ExtractText,
                format!("no extracted text for {}", id),
            ));
        };

        let text = tokio::fs::read_to_string(&source).await?;
        let summary = self
            .client
            .complete(&self.task, &summary_prompt(&item.title, &text, &language))
            .await?;
        if summary.trim().is_empty() {
            return Err(StageError::Failed(anyhow::anyhow!("empty summary for {}", id)));
        }

        let path = self.artifacts.summary_path(id, &language);
        self.artifacts.write_atomic(&path, summary.trim()).await?;
        Ok(StageArtifact { path, language })
    }
}
