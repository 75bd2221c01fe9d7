//! Generation service client.
//!
//! Defines the [`Generator`] seam used by the briefing orchestrator and the
//! evaluation hook, plus the OpenAI chat-completions implementation. No
//! retry here: a failed generation becomes the report's terminal `failed`
//! state, and evaluation failures are swallowed by the hook.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Trait for text-generation providers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;
    /// Run one completion with a system instruction and a user message,
    /// returning the generated text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Generation provider using the OpenAI chat completions API. Requires the
/// `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content` from the chat completions response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            anyhow::anyhow!("invalid completion response: missing choices[0].message.content")
        })?;

    Ok(content.trim().to_string())
}
