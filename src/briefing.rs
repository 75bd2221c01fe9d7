//! Briefing orchestrator.
//!
//! Runs the report lifecycle end to end: load the request from the ledger,
//! embed the prompt, retrieve project-scoped context from the vector index,
//! generate the briefing body, persist the raw and rendered output, and
//! record the terminal state. Each report runs as its own detached task;
//! the entry point returns before generation completes and callers observe
//! progress by polling the ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::Embedder;
use crate::generation::Generator;
use crate::index::{MetadataFilter, VectorIndex};
use crate::ledger::Ledger;
use crate::models::Report;
use crate::render::render_document;

/// Project scope that searches the whole namespace instead of filtering.
pub const WILDCARD_PROJECT: &str = "any";

/// Upper bound on generations running at once. Submission is never
/// rejected; excess jobs stay `generating` until a permit frees up.
const MAX_CONCURRENT_GENERATIONS: usize = 8;

/// The generated body is expected to open with `# Briefing: <title>`.
const TITLE_MARKER: &str = "Briefing: ";

const SYSTEM_PROMPT: &str = "You are an assistant that generates briefings for project teams. \
The briefing must be written in markdown. It is very important to only include information \
that is real and relevant to the team in question.";

pub struct Briefing {
    ledger: Arc<Ledger>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    /// Judge for background evaluation; the generator itself unless
    /// overridden with [`Briefing::with_judge`].
    judge: Arc<dyn Generator>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    top_k: usize,
    reports_dir: PathBuf,
    eval_enabled: bool,
    limiter: tokio::sync::Semaphore,
}

struct GeneratedBriefing {
    title: String,
    rendered_path: PathBuf,
    user_prompt: String,
    contexts: Vec<String>,
    body: String,
}

impl Briefing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: Arc<dyn VectorIndex>,
        namespace: String,
        top_k: usize,
        reports_dir: PathBuf,
        eval_enabled: bool,
    ) -> Self {
        let judge = Arc::clone(&generator);
        Self {
            ledger,
            embedder,
            generator,
            judge,
            index,
            namespace,
            top_k,
            reports_dir,
            eval_enabled,
            limiter: tokio::sync::Semaphore::new(MAX_CONCURRENT_GENERATIONS),
        }
    }

    /// Use a dedicated model as the evaluation judge.
    pub fn with_judge(mut self, judge: Arc<dyn Generator>) -> Self {
        self.judge = judge;
        self
    }

    /// Create the ledger row and dispatch generation as a detached task.
    /// Returns the `generating` report immediately.
    pub async fn submit(
        self: &Arc<Self>,
        title: &str,
        prompt: &str,
        projects: &[String],
    ) -> Result<Report> {
        let report = self.ledger.create(title, prompt, projects).await?;

        let this = Arc::clone(self);
        let id = report.id.clone();
        tokio::spawn(async move {
            // Acquire fails only when the semaphore is closed, which never
            // happens over the orchestrator's lifetime.
            let Ok(_permit) = this.limiter.acquire().await else {
                return;
            };
            this.generate(&id).await;
        });

        Ok(report)
    }

    /// Run generation for one report to its terminal state. An unknown id
    /// is a no-op. Every failure between retrieval and persistence becomes
    /// the report's `failed` state with the message preserved verbatim; no
    /// retry.
    pub async fn generate(&self, report_id: &str) {
        let request = match self.ledger.request(report_id).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                eprintln!("ledger read failed for report {}: {:#}", report_id, e);
                return;
            }
        };
        let (prompt, projects) = request;

        match self.run(report_id, &prompt, &projects).await {
            Ok(generated) => {
                if let Err(e) = self
                    .ledger
                    .mark_complete(report_id, &generated.title, &generated.rendered_path)
                    .await
                {
                    eprintln!("ledger update failed for report {}: {:#}", report_id, e);
                    return;
                }

                if self.eval_enabled {
                    let ledger = Arc::clone(&self.ledger);
                    let generator = Arc::clone(&self.judge);
                    let id = report_id.to_string();
                    tokio::spawn(async move {
                        crate::eval::score_report(
                            ledger,
                            generator,
                            id,
                            generated.user_prompt,
                            generated.contexts,
                            generated.body,
                        )
                        .await;
                    });
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                eprintln!("report {} failed: {}", report_id, message);
                if let Err(e) = self.ledger.mark_failed(report_id, &message).await {
                    eprintln!("ledger update failed for report {}: {:#}", report_id, e);
                }
            }
        }
    }

    async fn run(
        &self,
        report_id: &str,
        prompt: &str,
        projects: &[String],
    ) -> Result<GeneratedBriefing> {
        let query_vec = self.embedder.embed(prompt).await?;

        let filter = scope_filter(projects);
        let matches = self
            .index
            .query(&self.namespace, &query_vec, self.top_k, filter.as_ref())
            .await?;

        let contexts: Vec<String> = matches.into_iter().map(|m| m.metadata.text).collect();
        let context = contexts.join("\n\n");

        let user_prompt = build_instructions(prompt, &context);
        let body = self.generator.complete(SYSTEM_PROMPT, &user_prompt).await?;

        let title = extract_title(&body, prompt);

        std::fs::create_dir_all(&self.reports_dir)
            .with_context(|| format!("failed to create {}", self.reports_dir.display()))?;

        let raw_path = self.reports_dir.join(format!("{}.md", report_id));
        std::fs::write(&raw_path, &body)
            .with_context(|| format!("failed to write {}", raw_path.display()))?;

        let rendered_path = self.reports_dir.join(format!("{}.txt", report_id));
        std::fs::write(&rendered_path, render_document(&body))
            .with_context(|| format!("failed to write {}", rendered_path.display()))?;

        Ok(GeneratedBriefing {
            title,
            rendered_path,
            user_prompt,
            contexts,
            body,
        })
    }
}

/// The wildcard scope searches the whole namespace; any other set filters
/// on project membership.
fn scope_filter(projects: &[String]) -> Option<MetadataFilter> {
    if projects.iter().any(|p| p == WILDCARD_PROJECT) {
        None
    } else {
        Some(MetadataFilter::project_in(projects))
    }
}

/// Fixed section template handed to the generation service.
fn build_instructions(prompt: &str, context: &str) -> String {
    format!(
        r#"Generate a briefing with the following markdown sections:
# Briefing: <report title>

## Recent activity
- Use bullets to list activities
- Highlight important information in **bold**

## Issues or blockers
- Use bullets to list problems
- Use *italics* for contextual information

## Cross-team interactions

## KPIs

## Planned tasks
- Use bullets to list tasks

---
If there is no information for a section, write "No information available."
---

Prompt: {prompt}

Relevant retrieved context:
{context}"#
    )
}

/// Title of the finished report: the text after the `Briefing: ` marker up
/// to the first line break. When the model did not follow the template the
/// title falls back to the request prompt instead of erroring.
fn extract_title(body: &str, prompt: &str) -> String {
    body.find(TITLE_MARKER)
        .map(|pos| {
            let after = &body[pos + TITLE_MARKER.len()..];
            after.lines().next().unwrap_or("").trim().to_string()
        })
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| prompt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_comes_from_the_marker_line() {
        let body = "# Briefing: Weekly progress for Alpha\n\n## Recent activity\n- shipped";
        assert_eq!(
            extract_title(body, "summarize progress"),
            "Weekly progress for Alpha"
        );
    }

    #[test]
    fn missing_marker_falls_back_to_prompt() {
        let body = "The model ignored the template entirely.";
        assert_eq!(extract_title(body, "summarize progress"), "summarize progress");
    }

    #[test]
    fn empty_marker_title_falls_back_to_prompt() {
        let body = "# Briefing: \nbody";
        assert_eq!(extract_title(body, "summarize progress"), "summarize progress");
    }

    #[test]
    fn wildcard_scope_disables_the_filter() {
        assert!(scope_filter(&["any".to_string()]).is_none());
        assert!(scope_filter(&["Alpha".to_string(), "any".to_string()]).is_none());
        assert_eq!(
            scope_filter(&["Alpha".to_string()]),
            Some(MetadataFilter::project_in(&["Alpha".to_string()]))
        );
    }

    #[test]
    fn instructions_carry_template_prompt_and_context() {
        let out = build_instructions("summarize progress", "Sprint velocity improved.");
        for section in [
            "# Briefing:",
            "## Recent activity",
            "## Issues or blockers",
            "## Cross-team interactions",
            "## KPIs",
            "## Planned tasks",
            "No information available.",
        ] {
            assert!(out.contains(section), "missing {}", section);
        }
        assert!(out.contains("Prompt: summarize progress"));
        assert!(out.contains("Sprint velocity improved."));
    }
}
