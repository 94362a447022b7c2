//! Draft-generation capability.
//!
//! Maps (structured requirements, retrieved context) to a cited Markdown
//! draft via the chat capability. The generator itself never validates
//! its inputs — the orchestrator enforces the non-empty-requirements
//! precondition and short-circuits with [`EMPTY_REQUIREMENTS_MSG`] before
//! a capability call is made.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::capability::chat_completion;
use crate::config::LlmConfig;
use crate::models::{Requirements, RetrievedContext};

/// Short-circuit message returned when empty requirements reach the
/// generation stage. No capability call is made in that case.
pub const EMPTY_REQUIREMENTS_MSG: &str =
    "ERROR: `requirements` is empty. Did you call `extract_requirements` first?";

/// Fallback response skeleton used when no template file is configured.
const DEFAULT_TEMPLATE: &str = "\
# RFP Response

## Executive Summary

## Understanding of Scope

## Proposed Approach

## Relevant Experience

## Compliance & Quality

## Budget & Timeline
";

/// A generation capability: requirements plus context in, draft text out.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(
        &self,
        requirements: &Requirements,
        context: &RetrievedContext,
    ) -> Result<String>;
}

/// Generation backed by the OpenAI chat API.
pub struct OpenAiGenerator {
    config: LlmConfig,
    template: String,
}

impl OpenAiGenerator {
    /// Create a generator, reading the response template from
    /// `llm.template_path` when configured.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let template = match &config.template_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read template: {}", path.display()))?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        Ok(Self { config, template })
    }
}

#[async_trait]
impl DraftGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        requirements: &Requirements,
        context: &RetrievedContext,
    ) -> Result<String> {
        let user_prompt = render_prompt(&self.template, requirements, context)?;
        chat_completion(
            &self.config,
            "You are a Senior Proposal Writer at a leading CRO.",
            &user_prompt,
        )
        .await
    }
}

/// Generation stand-in for the `disabled` provider: always fails, which
/// the orchestrator surfaces as a user-visible error string.
pub struct DisabledGenerator;

#[async_trait]
impl DraftGenerator for DisabledGenerator {
    async fn generate(
        &self,
        _requirements: &Requirements,
        _context: &RetrievedContext,
    ) -> Result<String> {
        bail!("LLM provider is disabled. Set [llm] provider in config.")
    }
}

/// Select a generator for the configured provider.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn DraftGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config.clone())?)),
        _ => Ok(Arc::new(DisabledGenerator)),
    }
}

fn render_prompt(
    template: &str,
    requirements: &Requirements,
    context: &RetrievedContext,
) -> Result<String> {
    let requirements_json = serde_json::to_string_pretty(requirements)?;

    Ok(format!(
        "Write a professional, compliant RFP response.\n\n\
         Use this template:\n{template}\n\n\
         Available context (from past wins and compliance):\n{context}\n\n\
         Structured RFP requirements:\n{requirements}\n\n\
         Rules:\n\
         - Never hallucinate claims\n\
         - Cite sources in [brackets]\n\
         - Follow Veeva/FDA rules exactly\n\
         - Be concise but compelling\n\n\
         Output only the final response in Markdown.",
        template = template,
        context = context.render(),
        requirements = requirements_json,
    ))
}
