//! Core data models used throughout Debrief.
//!
//! These types represent the report jobs, indexed files, and vector records
//! that flow through the ingestion and briefing pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a report job.
///
/// The only transitions are `Generating → Complete` and
/// `Generating → Failed`; terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    Complete,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Generating => "generating",
            ReportStatus::Complete => "complete",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(ReportStatus::Generating),
            "complete" => Some(ReportStatus::Complete),
            "failed" => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

/// Reference-free quality scores attached to a completed report.
/// Each score is independently nullable; evaluation is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalScores {
    pub context_precision: Option<f64>,
    pub context_recall: Option<f64>,
    pub answer_relevancy: Option<f64>,
    pub faithfulness: Option<f64>,
}

impl EvalScores {
    pub fn is_empty(&self) -> bool {
        self.context_precision.is_none()
            && self.context_recall.is_none()
            && self.answer_relevancy.is_none()
            && self.faithfulness.is_none()
    }
}

/// A report job row in the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: String,
    /// Derived from the generated body on completion; the requested title
    /// until then.
    pub title: Option<String>,
    pub prompt: String,
    pub projects: Vec<String>,
    pub created_at: i64,
    pub status: ReportStatus,
    pub error: Option<String>,
    pub download_path: Option<String>,
    #[serde(flatten)]
    pub scores: EvalScores,
}

/// Metadata stored with every vector in the remote index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Basename of the source file.
    pub source: String,
    /// Raw chunk text.
    pub text: String,
    /// Owning project tag.
    pub project: String,
}

/// A vector record as upserted into the index. Id scheme:
/// `{basename}-{chunk index}`.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A ranked match returned from a vector query.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}
