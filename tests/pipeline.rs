//! End-to-end pipeline tests with in-process stand-ins for the embedding,
//! generation, and vector-index services.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use debrief::briefing::Briefing;
use debrief::config::{ChunkingConfig, StorageConfig};
use debrief::embedding::Embedder;
use debrief::generation::Generator;
use debrief::index::MemoryIndex;
use debrief::ingest::{IndexOutcome, Ingestor};
use debrief::ledger::Ledger;
use debrief::models::{Report, ReportStatus};
use debrief::{db, migrate};

/// Deterministic offline embedder: a tiny character histogram.
struct HistEmbedder;

#[async_trait]
impl Embedder for HistEmbedder {
    fn model_name(&self) -> &str {
        "hist-test"
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 16];
        for (i, c) in text.chars().enumerate() {
            v[(c as usize + i) % 16] += 1.0;
        }
        Ok(v)
    }
}

/// Returns a fixed body and records every user prompt it was handed.
struct ScriptedGenerator {
    body: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(body: &str) -> Arc<Self> {
        Arc::new(Self {
            body: body.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted-test"
    }
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        Ok(self.body.clone())
    }
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing-test"
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        anyhow::bail!("generation API error 500: upstream down")
    }
}

struct Harness {
    ledger: Arc<Ledger>,
    ingestor: Ingestor,
    briefing: Arc<Briefing>,
}

async fn harness(dir: &Path, generator: Arc<dyn Generator>, eval_enabled: bool) -> Harness {
    let pool = db::connect_path(&dir.join("debrief.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let embedder: Arc<dyn Embedder> = Arc::new(HistEmbedder);
    let index = Arc::new(MemoryIndex::new());
    let ledger = Arc::new(Ledger::new(pool.clone()));

    let ingestor = Ingestor::new(
        pool,
        Arc::clone(&embedder),
        index.clone(),
        ChunkingConfig {
            chunk_size: 200,
            overlap: 20,
        },
        StorageConfig {
            uploads_root: dir.join("uploads"),
            reports_dir: dir.join("reports"),
            exclude_globs: vec![],
        },
        "test".to_string(),
    );

    let briefing = Arc::new(Briefing::new(
        Arc::clone(&ledger),
        embedder,
        generator,
        index,
        "test".to_string(),
        15,
        dir.join("reports"),
        eval_enabled,
    ));

    Harness {
        ledger,
        ingestor,
        briefing,
    }
}

fn write_upload(dir: &Path, rel: &str, body: &str) -> PathBuf {
    let path = dir.join("uploads").join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    path
}

async fn wait_terminal(ledger: &Ledger, id: &str) -> Report {
    for _ in 0..250 {
        if let Some(report) = ledger.get(id).await.unwrap() {
            if report.status != ReportStatus::Generating {
                return report;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("report {} never reached a terminal state", id);
}

const TEMPLATE_BODY: &str = "# Briefing: Weekly progress for Alpha\n\n\
## Recent activity\n- **Sprint velocity improved.**\n\n\
## Issues or blockers\nNo information available.\n\n\
## Cross-team interactions\nNo information available.\n\n\
## KPIs\nNo information available.\n\n\
## Planned tasks\nNo information available.\n";

#[tokio::test]
async fn briefing_runs_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(TEMPLATE_BODY);
    let h = harness(tmp.path(), generator.clone(), false).await;

    let file = write_upload(tmp.path(), "Alpha/notes.txt", "Sprint velocity improved.");
    assert!(matches!(
        h.ingestor.index_file(&file, "Alpha", false).await,
        IndexOutcome::Indexed(_)
    ));

    let report = h
        .briefing
        .submit("Weekly", "How did the sprint go?", &["Alpha".to_string()])
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Generating);

    let finished = wait_terminal(&h.ledger, &report.id).await;
    assert_eq!(finished.status, ReportStatus::Complete);
    assert_eq!(finished.title.as_deref(), Some("Weekly progress for Alpha"));
    assert!(finished.error.is_none());

    // The retrieved chunk reached the generation prompt.
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Sprint velocity improved."));
    assert!(prompts[0].contains("Prompt: How did the sprint go?"));

    // Rendered output is downloadable plain text.
    let path = finished.download_path.expect("download path set");
    let rendered = std::fs::read_to_string(path).unwrap();
    assert!(rendered.contains("BRIEFING: WEEKLY PROGRESS FOR ALPHA"));
    assert!(rendered.contains("  • Sprint velocity improved."));
    assert!(rendered.contains("No information available."));
    assert!(!rendered.contains("**"));

    // The raw markdown body is kept next to the rendered output.
    let raw = tmp.path().join("reports").join(format!("{}.md", report.id));
    assert_eq!(std::fs::read_to_string(raw).unwrap(), TEMPLATE_BODY);
}

#[tokio::test]
async fn project_scope_limits_retrieved_context() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(TEMPLATE_BODY);
    let h = harness(tmp.path(), generator.clone(), false).await;

    let a = write_upload(tmp.path(), "TeamA/a.txt", "alpha exclusive fact");
    let b = write_upload(tmp.path(), "TeamB/b.txt", "beta exclusive fact");
    h.ingestor.index_file(&a, "TeamA", false).await;
    h.ingestor.index_file(&b, "TeamB", false).await;

    let scoped = h
        .briefing
        .submit("Scoped", "what happened?", &["TeamA".to_string()])
        .await
        .unwrap();
    wait_terminal(&h.ledger, &scoped.id).await;

    let wide = h
        .briefing
        .submit("Wide", "what happened?", &["any".to_string()])
        .await
        .unwrap();
    wait_terminal(&h.ledger, &wide.id).await;

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("alpha exclusive fact"));
    assert!(!prompts[0].contains("beta exclusive fact"));
    assert!(prompts[1].contains("alpha exclusive fact"));
    assert!(prompts[1].contains("beta exclusive fact"));
}

#[tokio::test]
async fn generation_failure_marks_the_report_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(tmp.path(), Arc::new(FailingGenerator), false).await;

    let report = h
        .briefing
        .submit("Weekly", "summarize", &["Alpha".to_string()])
        .await
        .unwrap();

    let finished = wait_terminal(&h.ledger, &report.id).await;
    assert_eq!(finished.status, ReportStatus::Failed);
    assert!(finished
        .error
        .as_deref()
        .unwrap()
        .contains("upstream down"));
    assert!(finished.download_path.is_none());
}

#[tokio::test]
async fn concurrent_submissions_get_unique_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(TEMPLATE_BODY);
    let h = harness(tmp.path(), generator, false).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let briefing = Arc::clone(&h.briefing);
        handles.push(tokio::spawn(async move {
            briefing
                .submit(
                    &format!("Report {}", i),
                    &format!("prompt {}", i),
                    &["any".to_string()],
                )
                .await
                .unwrap()
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(ids.insert(report.id), "duplicate report id");
    }
    assert_eq!(ids.len(), 20);

    for id in &ids {
        let finished = wait_terminal(&h.ledger, id).await;
        assert_eq!(finished.status, ReportStatus::Complete);
    }
    assert_eq!(h.ledger.list().await.unwrap().len(), 20);
}

#[tokio::test]
async fn evaluation_attaches_scores_in_the_background() {
    let tmp = tempfile::tempdir().unwrap();
    // The same scripted model acts as judge; a JSON body doubles as a
    // parseable verdict.
    let generator = ScriptedGenerator::new(
        r#"{"context_precision": 0.8, "context_recall": 0.6, "answer_relevancy": 0.9, "faithfulness": 1.0}"#,
    );
    let h = harness(tmp.path(), generator, true).await;

    let report = h
        .briefing
        .submit("Weekly", "summarize progress", &["any".to_string()])
        .await
        .unwrap();

    let finished = wait_terminal(&h.ledger, &report.id).await;
    assert_eq!(finished.status, ReportStatus::Complete);
    // Body has no title marker, so the title falls back to the prompt.
    assert_eq!(finished.title.as_deref(), Some("summarize progress"));

    // Scores land after completion without touching status.
    for _ in 0..250 {
        let current = h.ledger.get(&report.id).await.unwrap().unwrap();
        if !current.scores.is_empty() {
            assert_eq!(current.status, ReportStatus::Complete);
            assert_eq!(current.scores.faithfulness, Some(1.0));
            assert_eq!(current.scores.context_recall, Some(0.6));
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("scores were never recorded");
}
