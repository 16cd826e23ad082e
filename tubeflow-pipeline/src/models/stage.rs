//! Ordered processing stages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::work_item::ItemFilter;

/// One ordered processing step of a work item
///
/// Declaration order is pipeline order, so `Ord` compares stage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    Transcribe,
    ExtractText,
    Summarize,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Acquire,
        Stage::Transcribe,
        Stage::ExtractText,
        Stage::Summarize,
    ];

    /// Position in the pipeline (persisted as `run_until`)
    pub fn rank(self) -> i64 {
        match self {
            Stage::Acquire => 0,
            Stage::Transcribe => 1,
            Stage::ExtractText => 2,
            Stage::Summarize => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.rank() == rank)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Transcribe => "transcribe",
            Stage::ExtractText => "extract_text",
            Stage::Summarize => "summarize",
        }
    }

    /// Name of the completion flag column on `work_items`
    pub fn flag_column(self) -> &'static str {
        match self {
            Stage::Acquire => "acquired",
            Stage::Transcribe => "transcribed",
            Stage::ExtractText => "text_extracted",
            Stage::Summarize => "summarized",
        }
    }

    /// The stage whose flag must be true before this one may run
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Acquire => None,
            Stage::Transcribe => Some(Stage::Acquire),
            Stage::ExtractText => Some(Stage::Transcribe),
            Stage::Summarize => Some(Stage::ExtractText),
        }
    }

    /// Stages strictly after this one, in order
    pub fn downstream(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| *s > self)
    }

    /// Flag predicate selecting the items this stage should process next
    ///
    /// Prerequisite flag set, own flag clear, and the item's `run_until`
    /// reaches this stage.
    pub fn eligibility(self) -> ItemFilter {
        let filter = ItemFilter::default()
            .with_flag(self, false)
            .run_until_at_least(self);
        match self.prerequisite() {
            Some(prev) => filter.with_flag(prev, true),
            None => filter,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acquire" => Ok(Stage::Acquire),
            "transcribe" => Ok(Stage::Transcribe),
            "extract_text" => Ok(Stage::ExtractText),
            "summarize" => Ok(Stage::Summarize),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}
