use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where uploaded documents live and where rendered reports are written.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub uploads_root: PathBuf,
    pub reports_dir: PathBuf,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string(), "**/.DS_Store".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4.1".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_generation_timeout_secs() -> u64 {
    120
}

/// Remote vector-search index settings. The API key is read from the
/// `VECTOR_INDEX_API_KEY` environment variable, never from this file.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    #[serde(default = "default_eval_enabled")]
    pub enabled: bool,
    /// Judge model; defaults to the generation model when unset.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: default_eval_enabled(),
            model: None,
        }
    }
}

fn default_eval_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate generation
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    // Validate index
    if config.index.name.trim().is_empty() {
        anyhow::bail!("index.name must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/debrief.sqlite"

[storage]
uploads_root = "./uploads"
reports_dir = "./reports"

[index]
name = "briefing-index"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.overlap, 50);
        assert_eq!(cfg.retrieval.top_k, 15);
        assert_eq!(cfg.embedding.model, "text-embedding-3-small");
        assert_eq!(cfg.index.namespace, "default");
        assert!(cfg.evaluation.enabled);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let body = format!("{}\n[chunking]\nchunk_size = 100\noverlap = 100\n", MINIMAL);
        let f = write_config(&body);
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let body = format!("{}\n[generation]\ntemperature = 3.5\n", MINIMAL);
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn empty_index_name_rejected() {
        let body = MINIMAL.replace("briefing-index", " ");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
