use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use debrief::briefing::Briefing;
use debrief::config::{load_config, Config, GenerationConfig};
use debrief::embedding::{discover_dims, Embedder, OpenAiEmbedder};
use debrief::generation::{Generator, OpenAiGenerator};
use debrief::index::{RemoteIndex, VectorIndex};
use debrief::ingest::{project_for, IndexOutcome, Ingestor};
use debrief::ledger::Ledger;
use debrief::models::ReportStatus;
use debrief::{db, migrate, server};

#[derive(Parser)]
#[command(
    name = "debrief",
    version,
    about = "Index project documents and generate briefings from them"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "./config/debrief.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and run migrations
    Init,
    /// List the documents available under the uploads root
    Files,
    /// Index documents into the vector index
    Index {
        /// Single file to index; omit with --all to index everything
        path: Option<PathBuf>,
        /// Index every document under the uploads root
        #[arg(long)]
        all: bool,
        /// Re-index even when the file is unchanged
        #[arg(long)]
        force: bool,
        /// Project tag for a single file (default: its parent directory name)
        #[arg(long)]
        project: Option<String>,
    },
    /// Create, list, or download briefing reports
    Report {
        #[command(subcommand)]
        action: ReportCommand,
    },
    /// Run the HTTP API server
    Serve,
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Generate a briefing and wait for it to finish
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        prompt: String,
        /// Project scopes; pass "any" to search everything
        #[arg(long, value_delimiter = ',', required = true)]
        projects: Vec<String>,
    },
    /// List all reports with status and scores
    List,
    /// Write a completed report's rendered output to a file or stdout
    Download {
        id: String,
        /// Destination file; prints to stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Fully wired pipeline for commands that talk to the remote services.
struct App {
    ledger: Arc<Ledger>,
    ingestor: Arc<Ingestor>,
    briefing: Arc<Briefing>,
}

async fn build_app(config: &Config) -> anyhow::Result<App> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
    let dims = discover_dims(embedder.as_ref()).await?;

    let index: Arc<dyn VectorIndex> =
        Arc::new(RemoteIndex::connect(&config.index, dims).await?);
    let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(&config.generation)?);

    let ledger = Arc::new(Ledger::new(pool.clone()));
    let ingestor = Arc::new(Ingestor::new(
        pool,
        Arc::clone(&embedder),
        Arc::clone(&index),
        config.chunking.clone(),
        config.storage.clone(),
        config.index.namespace.clone(),
    ));

    let mut briefing = Briefing::new(
        Arc::clone(&ledger),
        embedder,
        Arc::clone(&generator),
        index,
        config.index.namespace.clone(),
        config.retrieval.top_k,
        config.storage.reports_dir.clone(),
        config.evaluation.enabled,
    );
    if let Some(model) = &config.evaluation.model {
        let judge_config = GenerationConfig {
            model: model.clone(),
            ..config.generation.clone()
        };
        briefing = briefing.with_judge(Arc::new(OpenAiGenerator::new(&judge_config)?));
    }

    Ok(App {
        ledger,
        ingestor,
        briefing: Arc::new(briefing),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database ready at {}", config.db.path.display());
        }

        Command::Files => {
            let root = &config.storage.uploads_root;
            if !root.exists() {
                println!("No uploads directory at {}", root.display());
                return Ok(());
            }
            let mut files: Vec<String> = walkdir::WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    e.path()
                        .strip_prefix(root)
                        .unwrap_or(e.path())
                        .to_string_lossy()
                        .to_string()
                })
                .collect();
            files.sort();
            for file in &files {
                println!("{}", file);
            }
            println!("{} file(s)", files.len());
        }

        Command::Index {
            path,
            all,
            force,
            project,
        } => {
            let app = build_app(&config).await?;
            match (path, all) {
                (Some(path), false) => {
                    let project = project.unwrap_or_else(|| project_for(&path));
                    match app.ingestor.index_file(&path, &project, force).await {
                        IndexOutcome::Indexed(n) => {
                            println!("Indexed {} ({} chunks, project {})", path.display(), n, project)
                        }
                        IndexOutcome::Unchanged => println!("Unchanged, skipping (use --force to re-index)"),
                        IndexOutcome::Skipped => println!("Unsupported file type, skipped"),
                        IndexOutcome::Failed => anyhow::bail!("indexing failed, see log above"),
                    }
                }
                (None, true) => {
                    let summary = app.ingestor.index_all(force).await?;
                    println!(
                        "Indexed {} file(s) ({} chunks); {} unchanged, {} skipped, {} failed",
                        summary.indexed, summary.chunks, summary.unchanged, summary.skipped, summary.failed
                    );
                }
                _ => anyhow::bail!("pass a file path or --all"),
            }
        }

        Command::Report { action } => match action {
            ReportCommand::Create {
                title,
                prompt,
                projects,
            } => {
                let app = build_app(&config).await?;
                let report = app.ledger.create(&title, &prompt, &projects).await?;
                println!("Generating report {} ...", report.id);
                app.briefing.generate(&report.id).await;

                let finished = app
                    .ledger
                    .get(&report.id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("report disappeared from the ledger"))?;
                match finished.status {
                    ReportStatus::Complete => {
                        println!("Complete: {}", finished.title.unwrap_or(title));
                        if let Some(path) = finished.download_path {
                            println!("Output: {}", path);
                        }
                    }
                    ReportStatus::Failed => {
                        anyhow::bail!(
                            "generation failed: {}",
                            finished.error.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                    ReportStatus::Generating => {
                        anyhow::bail!("report is still generating; check `debrief report list`")
                    }
                }
            }

            ReportCommand::List => {
                let pool = db::connect(&config).await?;
                migrate::run_migrations(&pool).await?;
                let ledger = Ledger::new(pool);

                let reports = ledger.list().await?;
                if reports.is_empty() {
                    println!("No reports yet");
                    return Ok(());
                }
                for report in reports {
                    let title = report.title.as_deref().unwrap_or("(untitled)");
                    println!("{}  {:<10}  {}", report.id, report.status.as_str(), title);
                    if let Some(error) = &report.error {
                        println!("  error: {}", error);
                    }
                    if !report.scores.is_empty() {
                        println!(
                            "  scores: precision={} recall={} relevancy={} faithfulness={}",
                            fmt_score(report.scores.context_precision),
                            fmt_score(report.scores.context_recall),
                            fmt_score(report.scores.answer_relevancy),
                            fmt_score(report.scores.faithfulness),
                        );
                    }
                }
            }

            ReportCommand::Download { id, out } => {
                let pool = db::connect(&config).await?;
                migrate::run_migrations(&pool).await?;
                let ledger = Ledger::new(pool);

                let path = ledger
                    .download_path(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("report not ready or not found: {}", id))?;
                let body = std::fs::read_to_string(&path)?;
                match out {
                    Some(out) => {
                        std::fs::write(&out, body)?;
                        println!("Wrote {}", out.display());
                    }
                    None => print!("{}", body),
                }
            }
        },

        Command::Serve => {
            let app = build_app(&config).await?;
            server::run_server(&config, app.ledger, app.ingestor, app.briefing).await?;
        }
    }

    Ok(())
}

fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}
