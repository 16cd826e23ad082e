//! Item Store: persistent work items and their stage flags
//!
//! All writes go through a per-item lock so a read-merge-write of one item
//! never interleaves with another writer of the same item. Unrelated items
//! proceed in parallel.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tubeflow_common::{Error, Result};
use uuid::Uuid;

use crate::models::{AcquiredMetadata, ItemFilter, ItemPatch, Stage, SubmitOptions, WorkItem};
use crate::services::artifacts::ArtifactStore;
use crate::utils::retry_on_lock;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const SELECT_COLUMNS: &str = "SELECT id, source_id, title, channel_id, channel, published_at, \
     language, acquired, transcribed, text_extracted, summarized, run_until, created_at, \
     processed_at FROM work_items";

/// Lock map keyed by source id
///
/// Entries are removed once no task holds or waits for them.
#[derive(Default)]
struct ItemLocks {
    map: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ItemLocks {
    fn handle(&self, source_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(source_id.to_string()).or_default().clone()
    }

    fn prune(&self, source_id: &str, handle: &Arc<Mutex<()>>) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map plus the caller's
        if Arc::strong_count(handle) == 2 {
            map.remove(source_id);
        }
    }

    fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Persistent table of work items
#[derive(Clone)]
pub struct ItemStore {
    pool: SqlitePool,
    artifacts: ArtifactStore,
    locks: Arc<ItemLocks>,
    max_lock_wait_ms: u64,
}

impl ItemStore {
    /// Wrap `pool`, creating the tables if needed
    pub async fn open(pool: SqlitePool, artifacts: ArtifactStore) -> Result<Self> {
        crate::db::init_tables(&pool).await?;
        Ok(Self {
            pool,
            artifacts,
            locks: Arc::new(ItemLocks::default()),
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        })
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fails when the database is unreachable
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// All items matching `filter`, oldest first
    pub async fn get(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        query.push(" WHERE 1 = 1");

        if let Some(source_id) = &filter.source_id {
            query.push(" AND source_id = ").push_bind(source_id.clone());
        }
        for stage in Stage::ALL {
            if let Some(value) = filter.flag(stage) {
                query
                    .push(format!(" AND {} = ", stage.flag_column()))
                    .push_bind(value as i64);
            }
        }
        if let Some(stage) = filter.run_until_at_least {
            query.push(" AND run_until >= ").push_bind(stage.rank());
        }
        query.push(" ORDER BY created_at, rowid");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn get_one(&self, source_id: &str) -> Result<Option<WorkItem>> {
        Ok(self.get(&ItemFilter::source_id(source_id)).await?.into_iter().next())
    }

    /// Insert or replace the row for `item.source_id`
    ///
    /// The record id and creation time of an existing row are preserved.
    pub async fn upsert(&self, item: &WorkItem) -> Result<()> {
        let handle = self.locks.handle(&item.source_id);
        let result = {
            let _guard = handle.lock().await;
            self.write_row(item).await
        };
        self.locks.prune(&item.source_id, &handle);
        result
    }

    /// Remove the row and every derived artifact; true when a row existed
    pub async fn delete(&self, source_id: &str) -> Result<bool> {
        let handle = self.locks.handle(source_id);
        let result = {
            let _guard = handle.lock().await;
            self.delete_locked(source_id).await
        };
        self.locks.prune(source_id, &handle);
        result
    }

    async fn delete_locked(&self, source_id: &str) -> Result<bool> {
        let deleted = retry_on_lock("item delete", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM work_items WHERE source_id = ?")
                .bind(source_id)
                .execute(&self.pool)
                .await?;
            Ok::<_, Error>(result.rows_affected() > 0)
        })
        .await?;

        let removed = self.artifacts.remove_all(source_id).await?;
        info!(source_id, deleted, artifacts_removed = removed, "Deleted work item");
        Ok(deleted)
    }

    /// Guarded read-merge-write of one item
    ///
    /// Re-reads the stored row under the item's lock, merges only the fields
    /// set in `patch` and writes it back. Returns the merged snapshot.
    pub async fn update(&self, source_id: &str, patch: &ItemPatch) -> Result<WorkItem> {
        let handle = self.locks.handle(source_id);
        let result = {
            let _guard = handle.lock().await;
            self.update_locked(source_id, patch).await
        };
        self.locks.prune(source_id, &handle);
        result
    }

    async fn update_locked(&self, source_id: &str, patch: &ItemPatch) -> Result<WorkItem> {
        let mut item = self
            .get_one(source_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work item {}", source_id)))?;

        if patch.is_empty() {
            return Ok(item);
        }
        patch.apply(&mut item);
        self.write_row(&item).await?;
        debug!(source_id, ?patch, "Updated work item");
        Ok(item)
    }

    /// Create or refresh the row of a freshly acquired item
    ///
    /// With `options.force` every later stage flag is cleared so the item is
    /// processed again from transcription on. Returns the stored item and
    /// whether the row is new.
    pub async fn record_acquisition(
        &self,
        metadata: &AcquiredMetadata,
        options: &SubmitOptions,
    ) -> Result<(WorkItem, bool)> {
        let source_id = metadata.source_id.as_str();
        let handle = self.locks.handle(source_id);
        let result = {
            let _guard = handle.lock().await;
            self.record_acquisition_locked(metadata, options).await
        };
        self.locks.prune(source_id, &handle);
        result
    }

    async fn record_acquisition_locked(
        &self,
        metadata: &AcquiredMetadata,
        options: &SubmitOptions,
    ) -> Result<(WorkItem, bool)> {
        let existing = self.get_one(&metadata.source_id).await?;
        let created = existing.is_none();
        let mut item = existing.unwrap_or_else(|| WorkItem::new(&metadata.source_id));

        let mut patch = ItemPatch {
            title: Some(metadata.title.clone()),
            channel_id: Some(metadata.channel_id.clone()),
            channel: Some(metadata.channel.clone()),
            published_at: metadata.published_at,
            language: metadata.language.clone(),
            run_until: Some(options.run_until),
            ..ItemPatch::completed(Stage::Acquire)
        };
        if options.force {
            for stage in Stage::Acquire.downstream() {
                patch = patch.with_flag(stage, false);
            }
        }
        patch.apply(&mut item);
        // Re-acquisition always counts as a stage transition
        item.processed_at = Some(Utc::now());

        self.write_row(&item).await?;
        Ok((item, created))
    }

    /// Clear every flag after acquisition, then delete the derived artifacts
    ///
    /// Flags are written before any file is removed, so an interrupted or
    /// failed reprocess never leaves a flag without its artifact. The media
    /// and its sidecar are kept. Returns the number of files removed.
    pub async fn clear_for_reprocess(&self, source_id: &str) -> Result<usize> {
        let handle = self.locks.handle(source_id);
        let result = {
            let _guard = handle.lock().await;
            self.clear_for_reprocess_locked(source_id).await
        };
        self.locks.prune(source_id, &handle);
        result
    }

    async fn clear_for_reprocess_locked(&self, source_id: &str) -> Result<usize> {
        if let Some(mut item) = self.get_one(source_id).await? {
            let mut patch = ItemPatch::default();
            for stage in Stage::Acquire.downstream().filter(|s| item.flag(*s)) {
                patch = patch.with_flag(stage, false);
            }
            if !patch.is_empty() {
                patch.apply(&mut item);
                self.write_row(&item).await?;
                debug!(source_id, ?patch, "Cleared flags for reprocess");
            }
        }
        Ok(self.artifacts.remove_derived(source_id).await?)
    }

    /// Set flags whose artifacts already exist on disk
    ///
    /// Recovers items where the process stopped between writing an artifact
    /// and recording its flag. Flags are only ever set here, never cleared.
    /// Returns the number of items changed.
    pub async fn reconcile_artifacts(&self) -> Result<usize> {
        let items = self.get(&ItemFilter::all()).await?;
        let mut changed = 0;

        for item in items {
            let mut patch = ItemPatch::default();
            for stage in Stage::ALL {
                if item.flag(stage) {
                    continue;
                }
                if self.artifacts.stage_artifact(stage, &item).await?.is_some() {
                    patch = patch.with_flag(stage, true);
                }
            }
            if patch.is_empty() {
                continue;
            }

            match self.update(&item.source_id, &patch).await {
                Ok(_) => {
                    info!(source_id = %item.source_id, ?patch, "Recovered stage flags from artifacts");
                    changed += 1;
                }
                Err(e) => {
                    warn!(source_id = %item.source_id, error = %e, "Failed to recover stage flags");
                }
            }
        }
        Ok(changed)
    }

    /// Number of per-item locks currently held or awaited
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn write_row(&self, item: &WorkItem) -> Result<()> {
        retry_on_lock("item write", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO work_items (
                    id, source_id, title, channel_id, channel, published_at, language,
                    acquired, transcribed, text_extracted, summarized, run_until,
                    created_at, processed_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id) DO UPDATE SET
                    title = excluded.title,
                    channel_id = excluded.channel_id,
                    channel = excluded.channel,
                    published_at = excluded.published_at,
                    language = excluded.language,
                    acquired = excluded.acquired,
                    transcribed = excluded.transcribed,
                    text_extracted = excluded.text_extracted,
                    summarized = excluded.summarized,
                    run_until = excluded.run_until,
                    processed_at = excluded.processed_at
                "#,
            )
            .bind(item.id.to_string())
            .bind(&item.source_id)
            .bind(&item.title)
            .bind(&item.channel_id)
            .bind(&item.channel)
            .bind(item.published_at.map(format_time))
            .bind(&item.language)
            .bind(item.acquired as i64)
            .bind(item.transcribed as i64)
            .bind(item.text_extracted as i64)
            .bind(item.summarized as i64)
            .bind(item.run_until.rank())
            .bind(format_time(item.created_at))
            .bind(item.processed_at.map(format_time))
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(())
        })
        .await
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

fn item_from_row(row: &SqliteRow) -> Result<WorkItem> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid item id '{}': {}", id, e)))?;

    let run_until: i64 = row.try_get("run_until")?;
    let run_until = Stage::from_rank(run_until)
        .ok_or_else(|| Error::Internal(format!("Invalid run_until rank {}", run_until)))?;

    let created_at: String = row.try_get("created_at")?;
    let published_at: Option<String> = row.try_get("published_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;

    Ok(WorkItem {
        id,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        channel_id: row.try_get("channel_id")?,
        channel: row.try_get("channel")?,
        published_at: published_at.as_deref().map(parse_time).transpose()?,
        language: row.try_get("language")?,
        acquired: row.try_get::<i64, _>("acquired")? != 0,
        transcribed: row.try_get::<i64, _>("transcribed")? != 0,
        text_extracted: row.try_get::<i64, _>("text_extracted")? != 0,
        summarized: row.try_get::<i64, _>("summarized")? != 0,
        run_until,
        created_at: parse_time(&created_at)?,
        processed_at: processed_at.as_deref().map(parse_time).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tubeflow_common::db::init_memory_database;

    async fn store() -> (ItemStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_memory_database().await.unwrap();
        let store = ItemStore::open(pool, ArtifactStore::new(temp_dir.path()))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_upsert_preserves_identity() {
        let (store, _dir) = store().await;
        let item = WorkItem::new("abc123");
        store.upsert(&item).await.unwrap();

        let mut replacement = WorkItem::new("abc123");
        replacement.title = "Renamed".to_string();
        store.upsert(&replacement).await.unwrap();

        let stored = store.get_one("abc123").await.unwrap().unwrap();
        assert_eq!(stored.id, item.id);
        assert_eq!(stored.title, "Renamed");
        assert_eq!(store.get(&ItemFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let (store, _dir) = store().await;
        let err = store
            .update("missing", &ItemPatch::completed(Stage::Transcribe))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_record_acquisition_force_clears_later_flags() {
        let (store, _dir) = store().await;
        let mut item = WorkItem::new("abc123");
        item.acquired = true;
        item.transcribed = true;
        item.text_extracted = true;
        store.upsert(&item).await.unwrap();

        let metadata = AcquiredMetadata {
            title: "Title".to_string(),
            ..AcquiredMetadata::new("abc123")
        };
        let (kept, created) = store
            .record_acquisition(&metadata, &SubmitOptions::default())
            .await
            .unwrap();
        assert!(!created);
        assert!(kept.transcribed);

        let forced = SubmitOptions {
            force: true,
            ..SubmitOptions::default()
        };
        let (reset, _) = store.record_acquisition(&metadata, &forced).await.unwrap();
        assert!(reset.acquired);
        assert!(!reset.transcribed);
        assert!(!reset.text_extracted);
        assert_eq!(reset.id, item.id);
    }

    #[tokio::test]
    async fn test_timestamps_round_trip() {
        let (store, _dir) = store().await;
        let mut item = WorkItem::new("abc123");
        item.published_at = Some(Utc::now());
        store.upsert(&item).await.unwrap();

        let stored = store.get_one("abc123").await.unwrap().unwrap();
        assert_eq!(
            stored.published_at.map(format_time),
            item.published_at.map(format_time)
        );
        assert_eq!(format_time(stored.created_at), format_time(item.created_at));
    }
}
