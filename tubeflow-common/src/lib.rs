//! # tubeflow Common Library
//!
//! Shared code for the tubeflow pipeline including:
//! - Error type shared by every crate in the workspace
//! - Configuration loading (root folder resolution, TOML file)
//! - SQLite pool initialization
//! - Pipeline event types and the broadcast event bus

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
