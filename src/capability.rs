//! Shared chat-completion plumbing for the extraction and generation
//! capabilities.
//!
//! Both capabilities are opaque collaborators: a typed, failable call to
//! an external model. This module owns the HTTP client logic so the
//! capability modules only deal in prompts and parsed replies.
//!
//! Retry strategy mirrors the embedding client: 429 and 5xx retry with
//! exponential backoff, other 4xx fail immediately, network errors retry.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;

/// Call the OpenAI chat completions API and return the reply text.
///
/// # Errors
///
/// Returns an error when the provider is disabled or unknown, when
/// `OPENAI_API_KEY` is unset, when the API returns a non-retryable error,
/// or when all retries are exhausted. Callers degrade on error; they
/// never crash the pipeline.
pub async fn chat_completion(config: &LlmConfig, system: &str, user: &str) -> Result<String> {
    match config.provider.as_str() {
        "openai" => chat_openai(config, system, user).await,
        "disabled" => bail!("LLM provider is disabled. Set [llm] provider in config."),
        other => bail!("Unknown llm provider: {}", other),
    }
}

async fn chat_openai(config: &LlmConfig, system: &str, user: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "temperature": 0,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_chat_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_input(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
