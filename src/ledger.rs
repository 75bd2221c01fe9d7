//! Durable report job ledger.
//!
//! One row per briefing request, owned exclusively by this module. The
//! lifecycle is `generating → complete` or `generating → failed`; terminal
//! rows never transition again. Evaluation scores are written later,
//! independently, without touching status or error.
//!
//! Every operation takes the ledger's single mutex before touching the
//! backing store so read-modify-write sequences from concurrent detached
//! tasks cannot interleave.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{EvalScores, Report, ReportStatus};

pub struct Ledger {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Mutex::new(()),
        }
    }

    /// Insert a new report row in `generating` state and return it. The
    /// caller is responsible for dispatching generation.
    pub async fn create(&self, title: &str, prompt: &str, projects: &[String]) -> Result<Report> {
        let _guard = self.lock.lock().await;

        let report = Report {
            id: Uuid::new_v4().to_string(),
            title: Some(title.to_string()),
            prompt: prompt.to_string(),
            projects: projects.to_vec(),
            created_at: chrono::Utc::now().timestamp(),
            status: ReportStatus::Generating,
            error: None,
            download_path: None,
            scores: EvalScores::default(),
        };

        sqlx::query(
            r#"
            INSERT INTO reports (id, title, prompt, projects, created_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.title)
        .bind(&report.prompt)
        .bind(serde_json::to_string(&report.projects)?)
        .bind(report.created_at)
        .bind(report.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(report)
    }

    /// The `(prompt, projects)` pair the orchestrator needs, or `None` for
    /// an unknown id.
    pub async fn request(&self, id: &str) -> Result<Option<(String, Vec<String>)>> {
        let _guard = self.lock.lock().await;

        let row = sqlx::query("SELECT prompt, projects FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let prompt: String = row.get("prompt");
                let projects: Vec<String> = serde_json::from_str(row.get("projects"))?;
                Ok(Some((prompt, projects)))
            }
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Report>> {
        let _guard = self.lock.lock().await;

        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_report).transpose()
    }

    /// All reports in storage order.
    pub async fn list(&self) -> Result<Vec<Report>> {
        let _guard = self.lock.lock().await;

        let rows = sqlx::query("SELECT * FROM reports")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_report).collect()
    }

    /// Download path of a completed report; `None` when the id is unknown
    /// or generation has not produced an output yet.
    pub async fn download_path(&self, id: &str) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock().await;

        let path: Option<Option<String>> =
            sqlx::query_scalar("SELECT download_path FROM reports WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(path.flatten().map(PathBuf::from))
    }

    /// Transition `generating → complete`, setting the extracted title and
    /// the rendered output path. A row already in a terminal state is left
    /// untouched.
    pub async fn mark_complete(&self, id: &str, title: &str, path: &PathBuf) -> Result<()> {
        let _guard = self.lock.lock().await;

        sqlx::query(
            r#"
            UPDATE reports SET status = 'complete', title = ?, download_path = ?
            WHERE id = ? AND status = 'generating'
            "#,
        )
        .bind(title)
        .bind(path.to_string_lossy().as_ref())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition `generating → failed`, preserving the causing message
    /// verbatim. A row already in a terminal state is left untouched.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        sqlx::query(
            r#"
            UPDATE reports SET status = 'failed', error = ?
            WHERE id = ? AND status = 'generating'
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Attach evaluation scores. Never changes status or error.
    pub async fn record_scores(&self, id: &str, scores: &EvalScores) -> Result<()> {
        let _guard = self.lock.lock().await;

        sqlx::query(
            r#"
            UPDATE reports SET
                context_precision = ?,
                context_recall = ?,
                answer_relevancy = ?,
                faithfulness = ?
            WHERE id = ?
            "#,
        )
        .bind(scores.context_precision)
        .bind(scores.context_recall)
        .bind(scores.answer_relevancy)
        .bind(scores.faithfulness)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_report(row: sqlx::sqlite::SqliteRow) -> Result<Report> {
    let status_str: String = row.get("status");
    let status = ReportStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown report status in ledger: {}", status_str))?;

    Ok(Report {
        id: row.get("id"),
        title: row.get("title"),
        prompt: row.get("prompt"),
        projects: serde_json::from_str(row.get("projects"))?,
        created_at: row.get("created_at"),
        status,
        error: row.get("error"),
        download_path: row.get("download_path"),
        scores: EvalScores {
            context_precision: row.get("context_precision"),
            context_recall: row.get("context_recall"),
            answer_relevancy: row.get("answer_relevancy"),
            faithfulness: row.get("faithfulness"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use std::path::Path;

    async fn test_ledger(dir: &Path) -> Ledger {
        let pool = db::connect_path(&dir.join("ledger.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Ledger::new(pool)
    }

    #[tokio::test]
    async fn create_starts_generating() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        let report = ledger
            .create("Weekly", "summarize progress", &["Alpha".to_string()])
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Generating);
        assert!(report.error.is_none());
        assert!(report.download_path.is_none());

        let stored = ledger.get(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Generating);
        assert_eq!(stored.projects, vec!["Alpha".to_string()]);
    }

    #[tokio::test]
    async fn complete_sets_title_and_path() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        let report = ledger
            .create("Weekly", "summarize", &["Alpha".to_string()])
            .await
            .unwrap();
        let out = PathBuf::from("/tmp/out.txt");
        ledger
            .mark_complete(&report.id, "Weekly progress", &out)
            .await
            .unwrap();

        let stored = ledger.get(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Complete);
        assert_eq!(stored.title.as_deref(), Some("Weekly progress"));
        assert_eq!(
            ledger.download_path(&report.id).await.unwrap(),
            Some(out.clone())
        );
    }

    #[tokio::test]
    async fn failed_preserves_error_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        let report = ledger
            .create("Weekly", "summarize", &["Alpha".to_string()])
            .await
            .unwrap();
        ledger
            .mark_failed(&report.id, "generation API error 500: upstream down")
            .await
            .unwrap();

        let stored = ledger.get(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some("generation API error 500: upstream down")
        );
    }

    #[tokio::test]
    async fn terminal_states_never_transition() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        let report = ledger
            .create("Weekly", "summarize", &["Alpha".to_string()])
            .await
            .unwrap();
        ledger
            .mark_failed(&report.id, "first failure")
            .await
            .unwrap();

        // A late success from a racing task must not resurrect the row.
        ledger
            .mark_complete(&report.id, "late title", &PathBuf::from("/tmp/late.txt"))
            .await
            .unwrap();

        let stored = ledger.get(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Failed);
        assert!(stored.download_path.is_none());
    }

    #[tokio::test]
    async fn scores_do_not_touch_status() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        let report = ledger
            .create("Weekly", "summarize", &["Alpha".to_string()])
            .await
            .unwrap();
        ledger
            .mark_complete(&report.id, "Weekly", &PathBuf::from("/tmp/out.txt"))
            .await
            .unwrap();

        let scores = EvalScores {
            context_precision: Some(0.8),
            context_recall: None,
            answer_relevancy: Some(0.9),
            faithfulness: Some(1.0),
        };
        ledger.record_scores(&report.id, &scores).await.unwrap();

        let stored = ledger.get(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Complete);
        assert_eq!(stored.scores, scores);
    }

    #[tokio::test]
    async fn unknown_id_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = test_ledger(tmp.path()).await;

        assert!(ledger.request("nope").await.unwrap().is_none());
        assert!(ledger.download_path("nope").await.unwrap().is_none());
        assert!(ledger.get("nope").await.unwrap().is_none());
    }
}
