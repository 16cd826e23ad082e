//! Data models for the tubeflow pipeline

pub mod queue;
pub mod stage;
pub mod work_item;

pub use queue::{QueueEntry, QueueStatus, SubmitOptions};
pub use stage::Stage;
pub use work_item::{AcquiredMetadata, ItemFilter, ItemPatch, WorkItem};
