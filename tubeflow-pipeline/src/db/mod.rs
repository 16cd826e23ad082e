//! Database access for tubeflow-pipeline
//!
//! The pool itself comes from `tubeflow_common::db`; this module owns the
//! `work_items` table and the [`ItemStore`] built on it.

pub mod items;

pub use items::ItemStore;

use sqlx::SqlitePool;
use tubeflow_common::Result;

/// Create the pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            channel_id TEXT NOT NULL DEFAULT '',
            channel TEXT NOT NULL DEFAULT '',
            published_at TEXT,
            language TEXT,
            acquired INTEGER NOT NULL DEFAULT 0,
            transcribed INTEGER NOT NULL DEFAULT 0,
            text_extracted INTEGER NOT NULL DEFAULT 0,
            summarized INTEGER NOT NULL DEFAULT 0,
            run_until INTEGER NOT NULL DEFAULT 3,
            created_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_items_flags \
         ON work_items (acquired, transcribed, text_extracted, summarized)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
