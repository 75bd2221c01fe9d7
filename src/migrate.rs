use anyhow::Result;
use sqlx::SqlitePool;

/// Create the report ledger and indexed-file tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Report ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            title TEXT,
            prompt TEXT NOT NULL,
            projects TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            download_path TEXT,
            context_precision REAL,
            context_recall REAL,
            answer_relevancy REAL,
            faithfulness REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Change cache for ingested files
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexed_files (
            path TEXT PRIMARY KEY,
            project TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_indexed_files_project ON indexed_files(project)")
        .execute(pool)
        .await?;

    Ok(())
}
