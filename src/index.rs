//! Vector-search index client.
//!
//! Defines the [`VectorIndex`] seam used by the ingestion pipeline and the
//! briefing orchestrator, with two implementations:
//! - **[`RemoteIndex`]** — a serverless vector-search service speaking the
//!   Pinecone-style REST API. Construction ensures the remote index exists
//!   with the embedding model's dimensionality and cosine metric.
//! - **[`MemoryIndex`]** — brute-force cosine similarity over an in-memory
//!   map, for tests and offline runs.
//!
//! All operations are scoped to a namespace. Metadata filters cover the two
//! predicate shapes retrieval needs: field equality and set membership.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::models::{ChunkMetadata, ScoredMatch, VectorRecord};

/// A metadata predicate applied server-side to queries and deletes.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    /// `field == value`
    Eq { field: String, value: String },
    /// `field ∈ values`
    In { field: String, values: Vec<String> },
}

impl MetadataFilter {
    /// Filter on a vector's source-file basename.
    pub fn source_eq(basename: &str) -> Self {
        MetadataFilter::Eq {
            field: "source".to_string(),
            value: basename.to_string(),
        }
    }

    /// Filter on the owning project tag.
    pub fn project_in(projects: &[String]) -> Self {
        MetadataFilter::In {
            field: "project".to_string(),
            values: projects.to_vec(),
        }
    }

    /// Wire encoding: `{"field": {"$eq": v}}` / `{"field": {"$in": [..]}}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataFilter::Eq { field, value } => {
                serde_json::json!({ field: { "$eq": value } })
            }
            MetadataFilter::In { field, values } => {
                serde_json::json!({ field: { "$in": values } })
            }
        }
    }

    /// Local evaluation, used by [`MemoryIndex`].
    fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let field_value = |field: &str| match field {
            "source" => Some(metadata.source.as_str()),
            "project" => Some(metadata.project.as_str()),
            "text" => Some(metadata.text.as_str()),
            _ => None,
        };
        match self {
            MetadataFilter::Eq { field, value } => field_value(field) == Some(value.as_str()),
            MetadataFilter::In { field, values } => field_value(field)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
        }
    }
}

/// Namespace-scoped vector store operations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records; last write wins per id.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Ranked nearest-neighbour search with metadata. An omitted filter
    /// searches the whole namespace.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredMatch>>;

    /// Remove all records whose metadata matches. A namespace with no
    /// matching records (or one that does not exist yet) is a no-op, never
    /// an error.
    async fn delete_by_filter(&self, namespace: &str, filter: &MetadataFilter) -> Result<()>;
}

// ============ Remote index ============

/// Client for a serverless vector-search service (Pinecone-style REST).
///
/// [`RemoteIndex::connect`] has a documented construction-time side effect:
/// it checks whether the named index exists and creates it (cosine metric,
/// the caller's dimensionality) if absent, then resolves the data-plane
/// host. Creation is idempotent from the caller's perspective.
pub struct RemoteIndex {
    client: reqwest::Client,
    api_key: String,
    data_url: String,
}

impl RemoteIndex {
    pub async fn connect(config: &IndexConfig, dims: usize) -> Result<Self> {
        let api_key = std::env::var("VECTOR_INDEX_API_KEY")
            .map_err(|_| anyhow::anyhow!("VECTOR_INDEX_API_KEY environment variable not set"))?;

        if dims == 0 {
            bail!("vector index dimensionality must be > 0");
        }

        let client = reqwest::Client::new();

        let host = match describe_index(&client, &api_key, config).await? {
            Some(host) => host,
            None => create_index(&client, &api_key, config, dims).await?,
        };

        Ok(Self {
            client,
            api_key,
            data_url: format!("https://{}", host),
        })
    }
}

async fn describe_index(
    client: &reqwest::Client,
    api_key: &str,
    config: &IndexConfig,
) -> Result<Option<String>> {
    let response = client
        .get(format!("{}/indexes/{}", config.control_url, config.name))
        .header("Api-Key", api_key)
        .send()
        .await?;

    if response.status().as_u16() == 404 {
        return Ok(None);
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("index describe failed {}: {}", status, body);
    }

    let json: serde_json::Value = response.json().await?;
    let host = json
        .get("host")
        .and_then(|h| h.as_str())
        .ok_or_else(|| anyhow::anyhow!("index describe response missing host"))?;
    Ok(Some(host.to_string()))
}

async fn create_index(
    client: &reqwest::Client,
    api_key: &str,
    config: &IndexConfig,
    dims: usize,
) -> Result<String> {
    let body = serde_json::json!({
        "name": config.name,
        "dimension": dims,
        "metric": "cosine",
        "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
    });

    let response = client
        .post(format!("{}/indexes", config.control_url))
        .header("Api-Key", api_key)
        .json(&body)
        .send()
        .await?;

    // 409: another process created it between describe and create.
    if !response.status().is_success() && response.status().as_u16() != 409 {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("index create failed {}: {}", status, body);
    }

    describe_index(client, api_key, config)
        .await?
        .ok_or_else(|| anyhow::anyhow!("index '{}' missing after creation", config.name))
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": records,
            "namespace": namespace,
        });

        let response = self
            .client
            .post(format!("{}/vectors/upsert", self.data_url))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("vector upsert failed {}: {}", status, body);
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredMatch>> {
        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "namespace": namespace,
        });
        if let Some(f) = filter {
            body["filter"] = f.to_json();
        }

        let response = self
            .client
            .post(format!("{}/query", self.data_url))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("vector query failed {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        parse_query_matches(&json)
    }

    async fn delete_by_filter(&self, namespace: &str, filter: &MetadataFilter) -> Result<()> {
        let body = serde_json::json!({
            "filter": filter.to_json(),
            "namespace": namespace,
        });

        let response = self
            .client
            .post(format!("{}/vectors/delete", self.data_url))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        // A namespace with nothing to delete reports not-found; that is the
        // normal first-ingestion path.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("vector delete failed {}: {}", status, body);
        }
        Ok(())
    }
}

/// Extract `matches[].{id,score,metadata}` from a query response.
fn parse_query_matches(json: &serde_json::Value) -> Result<Vec<ScoredMatch>> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid query response: missing matches"))?;

    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let id = m
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| anyhow::anyhow!("invalid query response: match missing id"))?;
        let score = m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
        let metadata: ChunkMetadata = serde_json::from_value(
            m.get("metadata")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| anyhow::anyhow!("invalid query response metadata: {}", e))?;
        out.push(ScoredMatch {
            id: id.to_string(),
            score,
            metadata,
        });
    }
    Ok(out)
}

// ============ In-memory index ============

/// In-memory index for tests and offline runs. Brute-force cosine
/// similarity over all stored vectors, namespaced like the remote service.
pub struct MemoryIndex {
    namespaces: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records currently held in a namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .expect("memory index lock poisoned")
            .get(namespace)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Ids currently held in a namespace, in insertion order.
    pub fn ids(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .read()
            .expect("memory index lock poisoned")
            .get(namespace)
            .map(|records| records.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute cosine similarity between two embedding vectors. Returns `0.0`
/// for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;
        let stored = namespaces.entry(namespace.to_string()).or_default();

        for record in records {
            if let Some(existing) = stored.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            } else {
                stored.push(record);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredMatch>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;

        let mut scored: Vec<ScoredMatch> = namespaces
            .get(namespace)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
                    .map(|r| ScoredMatch {
                        id: r.id.clone(),
                        score: cosine_similarity(vector, &r.values),
                        metadata: r.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filter(&self, namespace: &str, filter: &MetadataFilter) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;

        // Missing namespace: nothing to delete, not an error.
        if let Some(records) = namespaces.get_mut(namespace) {
            records.retain(|r| !filter.matches(&r.metadata));
        }
        Ok(())
    }
}
