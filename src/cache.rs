//! Change cache deciding whether a file needs re-indexing.
//!
//! One row per ingested file, keyed by absolute path, holding the owning
//! project and the last-observed modification time in whole seconds. A file
//! is re-indexed only when its current mtime differs from the stored value
//! or the caller forces it. Rows are never deleted automatically; a stale
//! row for a removed file is inert because nothing asks about it again.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

pub struct ChangeCache {
    pool: SqlitePool,
}

impl ChangeCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current modification time of a file, truncated to whole seconds.
    /// I/O errors (file vanished, permission denied) propagate.
    pub fn file_mtime(path: &Path) -> Result<i64> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata.modified()?;
        let secs = modified
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(secs)
    }

    /// True when the file should be (re-)chunked and embedded: forced, never
    /// seen before, or modified since the stored timestamp. A missing row is
    /// not an error.
    pub async fn should_index(&self, path: &Path, forced: bool) -> Result<bool> {
        if forced {
            return Ok(true);
        }

        let current = Self::file_mtime(path)?;
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT mtime FROM indexed_files WHERE path = ?")
                .bind(path.to_string_lossy().as_ref())
                .fetch_optional(&self.pool)
                .await?;

        Ok(match stored {
            Some(mtime) => mtime != current,
            None => true,
        })
    }

    /// Upsert the row for a successfully ingested file. Idempotent.
    pub async fn record(&self, path: &Path, project: &str, mtime: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO indexed_files (path, project, mtime, indexed_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                project = excluded.project,
                mtime = excluded.mtime,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(path.to_string_lossy().as_ref())
        .bind(project)
        .bind(mtime)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use std::fs;

    async fn test_cache(dir: &Path) -> ChangeCache {
        let pool = db::connect_path(&dir.join("cache.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        ChangeCache::new(pool)
    }

    #[tokio::test]
    async fn unseen_file_needs_indexing() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = test_cache(tmp.path()).await;

        let file = tmp.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();

        assert!(cache.should_index(&file, false).await.unwrap());
    }

    #[tokio::test]
    async fn unchanged_file_is_skipped_until_forced() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = test_cache(tmp.path()).await;

        let file = tmp.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();
        let mtime = ChangeCache::file_mtime(&file).unwrap();

        cache.record(&file, "alpha", mtime).await.unwrap();
        assert!(!cache.should_index(&file, false).await.unwrap());
        assert!(cache.should_index(&file, true).await.unwrap());
    }

    #[tokio::test]
    async fn changed_mtime_triggers_reindex() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = test_cache(tmp.path()).await;

        let file = tmp.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();
        let mtime = ChangeCache::file_mtime(&file).unwrap();

        // Record a timestamp that differs from what the filesystem reports.
        cache.record(&file, "alpha", mtime - 60).await.unwrap();
        assert!(cache.should_index(&file, false).await.unwrap());
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = test_cache(tmp.path()).await;

        let file = tmp.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();
        let mtime = ChangeCache::file_mtime(&file).unwrap();

        cache.record(&file, "alpha", mtime).await.unwrap();
        cache.record(&file, "alpha", mtime).await.unwrap();
        assert!(!cache.should_index(&file, false).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_propagates_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = test_cache(tmp.path()).await;

        let gone = tmp.path().join("vanished.txt");
        assert!(cache.should_index(&gone, false).await.is_err());
    }
}
