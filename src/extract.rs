//! Structured-requirements extraction capability.
//!
//! Maps raw RFP text to the fixed [`Requirements`] schema via the chat
//! capability. The output schema is a hard contract consumed by retrieval
//! and generation; a reply that does not parse into it, or that leaves
//! required fields empty, is a capability failure for the orchestrator to
//! degrade on.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::capability::{chat_completion, truncate_input};
use crate::config::LlmConfig;
use crate::models::Requirements;

const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert RFP analyst. Extract structured \
requirements from the RFP text. Be precise and complete. Respond with a single JSON object \
with exactly these string fields: client, project_type, scope, budget_range, timeline, \
submission_deadline, and key_requirements (an array of 3 to 5 strings). Output JSON only, \
no prose.";

/// An extraction capability: raw RFP text in, structured requirements out.
#[async_trait]
pub trait RequirementExtractor: Send + Sync {
    async fn extract(&self, rfp_text: &str) -> Result<Requirements>;
}

/// Extraction backed by the OpenAI chat API.
pub struct OpenAiExtractor {
    config: LlmConfig,
}

impl OpenAiExtractor {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RequirementExtractor for OpenAiExtractor {
    async fn extract(&self, rfp_text: &str) -> Result<Requirements> {
        // Bound cost and latency on oversized uploads.
        let input = truncate_input(rfp_text, self.config.max_input_chars);

        let reply = chat_completion(&self.config, EXTRACTION_SYSTEM_PROMPT, input).await?;
        let requirements = parse_requirements(&reply)?;
        validate_requirements(&requirements)?;
        Ok(requirements)
    }
}

/// Extraction stand-in for the `disabled` provider: always fails, which
/// the orchestrator turns into a degraded, error-tagged outcome.
pub struct DisabledExtractor;

#[async_trait]
impl RequirementExtractor for DisabledExtractor {
    async fn extract(&self, _rfp_text: &str) -> Result<Requirements> {
        bail!("LLM provider is disabled. Set [llm] provider in config.")
    }
}

/// Select an extractor for the configured provider.
pub fn create_extractor(config: &LlmConfig) -> Arc<dyn RequirementExtractor> {
    match config.provider.as_str() {
        "openai" => Arc::new(OpenAiExtractor::new(config.clone())),
        _ => Arc::new(DisabledExtractor),
    }
}

/// Parse a model reply into [`Requirements`], tolerating a fenced code
/// block around the JSON object.
fn parse_requirements(reply: &str) -> Result<Requirements> {
    let body = strip_code_fence(reply.trim());
    serde_json::from_str(body).with_context(|| "Extraction reply was not valid requirements JSON")
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag, then the closing fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.trim().trim_end_matches("```").trim()
}

fn validate_requirements(req: &Requirements) -> Result<()> {
    let missing: Vec<&str> = [
        ("client", &req.client),
        ("project_type", &req.project_type),
        ("scope", &req.scope),
        ("budget_range", &req.budget_range),
        ("timeline", &req.timeline),
        ("submission_deadline", &req.submission_deadline),
    ]
    .iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| *name)
    .collect();

    if !missing.is_empty() {
        bail!("Extraction left required fields empty: {}", missing.join(", "));
    }

    if req.key_requirements.len() < 3 || req.key_requirements.len() > 5 {
        bail!(
            "Extraction produced {} key requirements; expected 3 to 5",
            req.key_requirements.len()
        );
    }

    Ok(())
}
