//! Text extraction stage: concurrent, no exclusive resource

use async_trait::async_trait;
use std::sync::Arc;

use super::{Dispatch, StageProcessor};
use crate::error::StageError;
use crate::models::{ItemPatch, Stage, WorkItem};
use crate::services::TextExtractor;

pub struct TextExtractionProcessor {
    extractor: Arc<dyn TextExtractor>,
}

impl TextExtractionProcessor {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl StageProcessor for TextExtractionProcessor {
    fn name(&self) -> &'static str {
        "text_extraction"
    }

    fn stage(&self) -> Stage {
        Stage::ExtractText
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Concurrent
    }

    async fn process(&self, item: WorkItem) -> Result<ItemPatch, StageError> {
        let artifact = self.extractor.extract(&item).await?;
        Ok(ItemPatch::default().with_language(artifact.language))
    }
}
