//! Summarization stage: concurrent, no exclusive resource

use async_trait::async_trait;
use std::sync::Arc;

use super::{Dispatch, StageProcessor};
use crate::error::StageError;
use crate::models::{ItemPatch, Stage, WorkItem};
use crate::services::Summarizer;

pub struct SummarizationProcessor {
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizationProcessor {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl StageProcessor for SummarizationProcessor {
    fn name(&self) -> &'static str {
        "summarization"
    }

    fn stage(&self) -> Stage {
        Stage::Summarize
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Concurrent
    }

    async fn process(&self, item: WorkItem) -> Result<ItemPatch, StageError> {
        self.summarizer.summarize(&item).await?;
        Ok(ItemPatch::default())
    }
}
