//! Ingestion pipeline orchestration.
//!
//! Composes the change cache, text extraction, the chunker, and the vector
//! index into a per-file pipeline, plus a directory walk that tags every
//! file with its immediate parent directory as the owning project.
//!
//! Per-file failures are logged and isolated: one unreadable document never
//! aborts a batch ingestion.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::cache::ChangeCache;
use crate::chunk::split_text;
use crate::config::{ChunkingConfig, StorageConfig};
use crate::embedding::Embedder;
use crate::extract::extract_text;
use crate::index::{MetadataFilter, VectorIndex};
use crate::models::{ChunkMetadata, VectorRecord};

/// Result of one `index_file` call, for batch reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// File was chunked, embedded, and upserted (chunk count).
    Indexed(usize),
    /// Modification time unchanged; nothing to do.
    Unchanged,
    /// Unsupported extension; silently skipped.
    Skipped,
    /// Extraction, embedding, or upsert failed; logged, not raised.
    Failed,
}

/// Batch totals from `index_all`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexSummary {
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks: u64,
}

pub struct Ingestor {
    cache: ChangeCache,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    storage: StorageConfig,
    namespace: String,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        storage: StorageConfig,
        namespace: String,
    ) -> Self {
        Self {
            cache: ChangeCache::new(pool),
            embedder,
            index,
            chunking,
            storage,
            namespace,
        }
    }

    /// Ingest one file into the vector index.
    ///
    /// Any failure is logged to stderr and reported as
    /// [`IndexOutcome::Failed`] without raising. Re-indexing the same file
    /// concurrently from two tasks is unsupported: the delete-then-upsert
    /// sequence for one basename must not interleave with itself.
    pub async fn index_file(&self, path: &Path, project: &str, forced: bool) -> IndexOutcome {
        match self.try_index_file(path, project, forced).await {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("error indexing {}: {:#}", path.display(), e);
                IndexOutcome::Failed
            }
        }
    }

    async fn try_index_file(
        &self,
        path: &Path,
        project: &str,
        forced: bool,
    ) -> Result<IndexOutcome> {
        // Observe the mtime before extraction; a write that lands mid-ingest
        // then differs from the recorded value and triggers a re-index.
        let mtime = ChangeCache::file_mtime(path)?;

        if !self.cache.should_index(path, forced).await? {
            return Ok(IndexOutcome::Unchanged);
        }

        let Some(text) = extract_text(path)? else {
            return Ok(IndexOutcome::Skipped);
        };

        let chunks = split_text(&text, self.chunking.chunk_size, self.chunking.overlap);

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?;

        // Purge the file's prior fragments so stale chunk ids from a longer
        // earlier version cannot survive. Absence is a no-op.
        self.index
            .delete_by_filter(&self.namespace, &MetadataFilter::source_eq(&basename))
            .await?;

        let mut records = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let values = self.embedder.embed(chunk).await?;
            records.push(VectorRecord {
                id: format!("{}-{}", basename, i),
                values,
                metadata: ChunkMetadata {
                    source: basename.clone(),
                    text: chunk.clone(),
                    project: project.to_string(),
                },
            });
        }

        let n = records.len();
        self.index.upsert(&self.namespace, records).await?;
        self.cache.record(path, project, mtime).await?;

        Ok(IndexOutcome::Indexed(n))
    }

    /// Walk the uploads root and ingest every file, tagging each with its
    /// immediate parent directory name as the project. Files are processed
    /// sequentially; traversal order is not guaranteed.
    pub async fn index_all(&self, forced: bool) -> Result<IndexSummary> {
        let exclude_set = build_globset(&self.storage.exclude_globs)?;
        let root = self.storage.uploads_root.clone();

        let mut summary = IndexSummary::default();

        for entry in WalkDir::new(&root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            if exclude_set.is_match(relative.to_string_lossy().as_ref()) {
                continue;
            }

            let project = project_for(path);
            match self.index_file(path, &project, forced).await {
                IndexOutcome::Indexed(n) => {
                    println!("  indexed {} ({} chunks, project {})", relative.display(), n, project);
                    summary.indexed += 1;
                    summary.chunks += n as u64;
                }
                IndexOutcome::Unchanged => summary.unchanged += 1,
                IndexOutcome::Skipped => summary.skipped += 1,
                IndexOutcome::Failed => summary.failed += 1,
            }
        }

        Ok(summary)
    }
}

/// The project tag for a file is its immediate parent directory's name.
/// For a file directly under the uploads root that is the root's own name.
pub fn project_for(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "default".to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
