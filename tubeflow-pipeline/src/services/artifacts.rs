//! On-disk artifacts produced by the pipeline stages
//!
//! Every artifact of an item lives in the downloads directory under the
//! item's source id:
//!
//! | Artifact        | File name                          |
//! |-----------------|------------------------------------|
//! | media           | `<id>.mp4`                         |
//! | sidecar         | `<id>.info.json`                   |
//! | transcript      | `<id>.<lang>.srt`                  |
//! | plain text      | `<id>.<lang>.txt`                  |
//! | reflowed text   | `<id>.<lang>.processed.txt`        |
//! | summary         | `<id>.<lang>.md`                   |

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{Stage, WorkItem};

/// Artifact directory accessor
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn media_path(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{}.mp4", source_id))
    }

    pub fn info_path(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{}.info.json", source_id))
    }

    pub fn transcript_path(&self, source_id: &str, lang: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.srt", source_id, lang))
    }

    pub fn text_path(&self, source_id: &str, lang: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.txt", source_id, lang))
    }

    pub fn processed_text_path(&self, source_id: &str, lang: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.processed.txt", source_id, lang))
    }

    pub fn summary_path(&self, source_id: &str, lang: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.md", source_id, lang))
    }

    /// Locate a non-empty transcript for `source_id` in any language
    ///
    /// The item's recorded language is tried first; returns the path and the
    /// language tag taken from the file name.
    pub async fn find_transcript(
        &self,
        source_id: &str,
        preferred_lang: Option<&str>,
    ) -> io::Result<Option<(PathBuf, String)>> {
        if let Some(lang) = preferred_lang {
            let path = self.transcript_path(source_id, lang);
            if is_non_empty(&path).await {
                return Ok(Some((path, lang.to_string())));
            }
        }

        for (path, name) in self.files_of(source_id).await? {
            let Some(rest) = name.strip_prefix(&format!("{}.", source_id)) else {
                continue;
            };
            let Some(lang) = rest.strip_suffix(".srt") else {
                continue;
            };
            if !lang.is_empty() && !lang.contains('.') && is_non_empty(&path).await {
                return Ok(Some((path, lang.to_string())));
            }
        }
        Ok(None)
    }

    /// Path of the artifact proving `stage` completed for `item`, if present
    pub async fn stage_artifact(&self, stage: Stage, item: &WorkItem) -> io::Result<Option<PathBuf>> {
        let id = item.source_id.as_str();
        let lang = item.language_or_default();

        let candidate = match stage {
            Stage::Acquire => {
                let media = self.media_path(id);
                if is_non_empty(&media).await {
                    Some(media)
                } else {
                    // Media is removed after transcription; the sidecar remains
                    Some(self.info_path(id))
                }
            }
            Stage::Transcribe => {
                return Ok(self
                    .find_transcript(id, item.language.as_deref())
                    .await?
                    .map(|(path, _)| path));
            }
            Stage::ExtractText => Some(self.processed_text_path(id, lang)),
            Stage::Summarize => Some(self.summary_path(id, lang)),
        };

        match candidate {
            Some(path) if is_non_empty(&path).await => Ok(Some(path)),
            _ => Ok(None),
        }
    }

    /// Write `contents` atomically (temp file + rename)
    pub async fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, contents).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Delete every `<id>.*` file; returns how many were removed
    pub async fn remove_all(&self, source_id: &str) -> io::Result<usize> {
        let mut removed = 0;
        for (path, _) in self.files_of(source_id).await? {
            tokio::fs::remove_file(&path).await?;
            debug!(source_id, path = %path.display(), "Removed artifact");
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete everything but the media and its sidecar
    pub async fn remove_derived(&self, source_id: &str) -> io::Result<usize> {
        let keep = [
            format!("{}.mp4", source_id),
            format!("{}.info.json", source_id),
        ];
        let mut removed = 0;
        for (path, name) in self.files_of(source_id).await? {
            if keep.contains(&name) {
                continue;
            }
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn files_of(&self, source_id: &str) -> io::Result<Vec<(PathBuf, String)>> {
        let prefix = format!("{}.", source_id);
        let mut files = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && entry.file_type().await?.is_file() {
                files.push((entry.path(), name));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// True when `path` is a regular file with at least one byte
pub async fn is_non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_find_transcript_in_any_language() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());

        store
            .write_atomic(&store.transcript_path("abc123", "zh"), "1\n00:00:00,000 --> 00:00:01,000\n你好\n")
            .await
            .unwrap();
        // Reflowed text must not be mistaken for a transcript
        store
            .write_atomic(&store.processed_text_path("abc123", "en"), "text")
            .await
            .unwrap();

        let (path, lang) = store.find_transcript("abc123", Some("en")).await.unwrap().unwrap();
        assert_eq!(lang, "zh");
        assert_eq!(path, store.transcript_path("abc123", "zh"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store.write_atomic(&store.transcript_path("abc123", "en"), "").await.unwrap();

        assert!(store.find_transcript("abc123", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_all_only_touches_matching_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store.write_atomic(&store.media_path("abc123"), "media").await.unwrap();
        store.write_atomic(&store.summary_path("abc123", "en"), "# s").await.unwrap();
        store.write_atomic(&store.media_path("abc1234"), "other").await.unwrap();

        let removed = store.remove_all("abc123").await.unwrap();

        assert_eq!(removed, 2);
        assert!(store.media_path("abc1234").exists());
        assert!(!store.media_path("abc123").exists());
    }

    #[tokio::test]
    async fn test_remove_derived_keeps_media_and_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store.write_atomic(&store.media_path("abc123"), "media").await.unwrap();
        store.write_atomic(&store.info_path("abc123"), "{}").await.unwrap();
        store.write_atomic(&store.transcript_path("abc123", "en"), "srt").await.unwrap();
        store.write_atomic(&store.summary_path("abc123", "en"), "# s").await.unwrap();

        assert_eq!(store.remove_derived("abc123").await.unwrap(), 2);
        assert!(store.media_path("abc123").exists());
        assert!(store.info_path("abc123").exists());
        assert!(!store.transcript_path("abc123", "en").exists());
    }

    #[tokio::test]
    async fn test_remove_all_missing_dir_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path().join("absent"));
        assert_eq!(store.remove_all("abc123").await.unwrap(), 0);
    }
}
