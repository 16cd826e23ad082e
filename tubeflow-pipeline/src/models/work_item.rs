//! Work item record, filters and patches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;

/// A media item tracked through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Internal record id
    pub id: Uuid,
    /// Stable external key (platform video id)
    pub source_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Detected content language, unknown until acquisition or transcription
    pub language: Option<String>,
    pub acquired: bool,
    pub transcribed: bool,
    pub text_extracted: bool,
    pub summarized: bool,
    /// Last stage this item should be advanced to
    pub run_until: Stage,
    pub created_at: DateTime<Utc>,
    /// Last successful stage transition
    pub processed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// New row for a first-seen source id, every flag clear
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            title: String::new(),
            channel_id: String::new(),
            channel: String::new(),
            published_at: None,
            language: None,
            acquired: false,
            transcribed: false,
            text_extracted: false,
            summarized: false,
            run_until: Stage::Summarize,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn flag(&self, stage: Stage) -> bool {
        match stage {
            Stage::Acquire => self.acquired,
            Stage::Transcribe => self.transcribed,
            Stage::ExtractText => self.text_extracted,
            Stage::Summarize => self.summarized,
        }
    }

    pub fn set_flag(&mut self, stage: Stage, value: bool) {
        match stage {
            Stage::Acquire => self.acquired = value,
            Stage::Transcribe => self.transcribed = value,
            Stage::ExtractText => self.text_extracted = value,
            Stage::Summarize => self.summarized = value,
        }
    }

    /// Every stage up to `run_until` is done
    pub fn is_complete(&self) -> bool {
        Stage::ALL
            .into_iter()
            .filter(|s| *s <= self.run_until)
            .all(|s| self.flag(s))
    }

    /// Language tag used in artifact file names
    pub fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or("en")
    }
}

/// Predicate over work items
///
/// `None` fields match anything. The store translates the same predicate
/// into SQL; [`ItemFilter::matches`] evaluates it in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
    pub source_id: Option<String>,
    pub acquired: Option<bool>,
    pub transcribed: Option<bool>,
    pub text_extracted: Option<bool>,
    pub summarized: Option<bool>,
    /// Only items whose `run_until` is at or beyond this stage
    pub run_until_at_least: Option<Stage>,
}

impl ItemFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn source_id(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::default()
        }
    }

    pub fn with_flag(mut self, stage: Stage, value: bool) -> Self {
        *self.flag_mut(stage) = Some(value);
        self
    }

    pub fn run_until_at_least(mut self, stage: Stage) -> Self {
        self.run_until_at_least = Some(stage);
        self
    }

    pub fn flag(&self, stage: Stage) -> Option<bool> {
        match stage {
            Stage::Acquire => self.acquired,
            Stage::Transcribe => self.transcribed,
            Stage::ExtractText => self.text_extracted,
            Stage::Summarize => self.summarized,
        }
    }

    fn flag_mut(&mut self, stage: Stage) -> &mut Option<bool> {
        match stage {
            Stage::Acquire => &mut self.acquired,
            Stage::Transcribe => &mut self.transcribed,
            Stage::ExtractText => &mut self.text_extracted,
            Stage::Summarize => &mut self.summarized,
        }
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(source_id) = &self.source_id {
            if *source_id != item.source_id {
                return false;
            }
        }
        if let Some(stage) = self.run_until_at_least {
            if item.run_until < stage {
                return false;
            }
        }
        Stage::ALL
            .into_iter()
            .all(|stage| self.flag(stage).map_or(true, |want| item.flag(stage) == want))
    }
}

/// Fields a single writer changes on one item
///
/// Only `Some` fields are merged into the stored row, so writers owning
/// different stages never overwrite each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub channel_id: Option<String>,
    pub channel: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub acquired: Option<bool>,
    pub transcribed: Option<bool>,
    pub text_extracted: Option<bool>,
    pub summarized: Option<bool>,
    pub run_until: Option<Stage>,
}

impl ItemPatch {
    /// Mark `stage` done
    pub fn completed(stage: Stage) -> Self {
        Self::default().with_flag(stage, true)
    }

    /// Clear the flag of `stage` (data drift repair or forced reprocess)
    pub fn reset(stage: Stage) -> Self {
        Self::default().with_flag(stage, false)
    }

    pub fn with_flag(mut self, stage: Stage, value: bool) -> Self {
        let slot = match stage {
            Stage::Acquire => &mut self.acquired,
            Stage::Transcribe => &mut self.transcribed,
            Stage::ExtractText => &mut self.text_extracted,
            Stage::Summarize => &mut self.summarized,
        };
        *slot = Some(value);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn flag(&self, stage: Stage) -> Option<bool> {
        match stage {
            Stage::Acquire => self.acquired,
            Stage::Transcribe => self.transcribed,
            Stage::ExtractText => self.text_extracted,
            Stage::Summarize => self.summarized,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `item`; returns true when any flag moved to true
    pub fn apply(&self, item: &mut WorkItem) -> bool {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(channel_id) = &self.channel_id {
            item.channel_id = channel_id.clone();
        }
        if let Some(channel) = &self.channel {
            item.channel = channel.clone();
        }
        if self.published_at.is_some() {
            item.published_at = self.published_at;
        }
        if let Some(language) = &self.language {
            item.language = Some(language.clone());
        }
        if let Some(run_until) = self.run_until {
            item.run_until = run_until;
        }

        let mut advanced = false;
        for stage in Stage::ALL {
            if let Some(value) = self.flag(stage) {
                advanced |= value && !item.flag(stage);
                item.set_flag(stage, value);
            }
        }
        if advanced {
            item.processed_at = Some(Utc::now());
        }
        advanced
    }
}

/// Metadata returned by a successful acquisition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquiredMetadata {
    pub source_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
}

impl AcquiredMetadata {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquired_item() -> WorkItem {
        let mut item = WorkItem::new("abc123");
        item.acquired = true;
        item
    }

    #[test]
    fn test_transcription_eligibility() {
        let item = acquired_item();
        assert!(Stage::Transcribe.eligibility().matches(&item));
        assert!(!Stage::ExtractText.eligibility().matches(&item));
        assert!(!Stage::Acquire.eligibility().matches(&item));
    }

    #[test]
    fn test_run_until_limits_eligibility() {
        let mut item = acquired_item();
        item.transcribed = true;
        item.run_until = Stage::Transcribe;
        assert!(!Stage::ExtractText.eligibility().matches(&item));
        assert!(item.is_complete());
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut item = acquired_item();
        item.title = "Original".to_string();

        let patch = ItemPatch::completed(Stage::Transcribe).with_language("zh");
        let advanced = patch.apply(&mut item);

        assert!(advanced);
        assert!(item.transcribed);
        assert!(item.acquired);
        assert_eq!(item.title, "Original");
        assert_eq!(item.language.as_deref(), Some("zh"));
        assert!(item.processed_at.is_some());
    }

    #[test]
    fn test_reset_does_not_stamp_processed_at() {
        let mut item = acquired_item();
        item.transcribed = true;
        assert!(!ItemPatch::reset(Stage::Transcribe).apply(&mut item));
        assert!(!item.transcribed);
        assert!(item.processed_at.is_none());
    }
}
