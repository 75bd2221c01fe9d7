//! Background quality evaluation for completed briefings.
//!
//! Scores a (prompt, retrieved contexts, answer) triple with reference-free
//! metrics — context precision, context recall, answer relevancy,
//! faithfulness — by asking the generation service to act as a judge and
//! return JSON in [0, 1]. Evaluation is best-effort telemetry: every
//! failure is logged and swallowed, and the report's status and error are
//! never touched.

use std::sync::Arc;

use anyhow::Result;

use crate::generation::Generator;
use crate::ledger::Ledger;
use crate::models::EvalScores;

const JUDGE_SYSTEM: &str = "You are a strict evaluator of retrieval-augmented generation. \
Respond with a single JSON object and nothing else.";

/// Entry point for the detached evaluation task.
pub async fn score_report(
    ledger: Arc<Ledger>,
    generator: Arc<dyn Generator>,
    report_id: String,
    question: String,
    contexts: Vec<String>,
    answer: String,
) {
    match judge(generator.as_ref(), &question, &contexts, &answer).await {
        Ok(scores) => {
            if let Err(e) = ledger.record_scores(&report_id, &scores).await {
                eprintln!("failed to store scores for report {}: {:#}", report_id, e);
            }
        }
        Err(e) => {
            eprintln!("evaluation failed for report {}: {:#}", report_id, e);
        }
    }
}

async fn judge(
    generator: &dyn Generator,
    question: &str,
    contexts: &[String],
    answer: &str,
) -> Result<EvalScores> {
    let context_block = if contexts.is_empty() {
        "(no context was retrieved)".to_string()
    } else {
        contexts.join("\n---\n")
    };

    let user = format!(
        r#"Score the following retrieval-augmented answer. Return JSON with keys
"context_precision", "context_recall", "answer_relevancy" and "faithfulness",
each a number between 0 and 1.

- context_precision: how much of the retrieved context is relevant to the question
- context_recall: how much of the information needed to answer is present in the context
- answer_relevancy: how directly the answer addresses the question
- faithfulness: how well every claim in the answer is supported by the context

Question:
{question}

Retrieved context:
{context_block}

Answer:
{answer}"#
    );

    let response = generator.complete(JUDGE_SYSTEM, &user).await?;
    parse_scores(&response)
}

/// Parse the judge's JSON, tolerating a markdown code fence around it.
/// Scores outside [0, 1] are clamped; missing keys stay unset.
fn parse_scores(text: &str) -> Result<EvalScores> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| anyhow::anyhow!("judge returned non-JSON: {}", e))?;

    let score = |key: &str| {
        json.get(key)
            .and_then(|v| v.as_f64())
            .map(|v| v.clamp(0.0, 1.0))
    };

    Ok(EvalScores {
        context_precision: score("context_precision"),
        context_recall: score("context_recall"),
        answer_relevancy: score("answer_relevancy"),
        faithfulness: score("faithfulness"),
    })
}
