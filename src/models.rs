//! Core data models for the RFP pipeline.
//!
//! These types represent the documents, chunks, requirements, and retrieved
//! context that flow through the ingestion and generation pipeline.

use serde::{Deserialize, Serialize};

/// Provenance metadata attached to a corpus document and inherited by
/// every chunk cut from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// File name (e.g. `"veeva_policy.txt"`). The citation identifier.
    pub source: String,
    /// Parent directory name (e.g. `"compliance"`).
    pub category: String,
    /// Path relative to the corpus root.
    pub path: String,
}

/// A raw knowledge-base document. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Document {
    pub body: String,
    pub meta: DocumentMeta,
}

/// A bounded-length segment of a document's body text, the atomic unit
/// of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic identifier: `"<relative path>#<index>"`.
    pub id: String,
    /// Position within the source document, starting at 0.
    pub index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
    pub meta: DocumentMeta,
}

/// A chunk paired with its embedding vector, as stored in the index.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Structured requirements extracted from raw RFP text.
///
/// All fields are non-empty on a successful extraction; the
/// [`ExtractionOutcome::Degraded`] variant carries the failure instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub client: String,
    pub project_type: String,
    pub scope: String,
    pub budget_range: String,
    pub timeline: String,
    pub submission_deadline: String,
    #[serde(default)]
    pub key_requirements: Vec<String>,
}

impl Requirements {
    /// True when no field carries any content. An empty value reaching the
    /// generation stage is a contract violation and short-circuits the run.
    pub fn is_empty(&self) -> bool {
        self.client.is_empty()
            && self.project_type.is_empty()
            && self.scope.is_empty()
            && self.budget_range.is_empty()
            && self.timeline.is_empty()
            && self.submission_deadline.is_empty()
            && self.key_requirements.is_empty()
    }
}

/// Result of the extraction stage: either structured requirements or an
/// error-tagged fallback that downstream stages must handle explicitly.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Extracted(Requirements),
    Degraded {
        error: String,
        /// First 500 characters of the raw input, kept for the audit trail.
        raw_excerpt: String,
    },
}

/// One retrieved passage: provenance plus a bounded snippet, ranked by
/// similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub source: String,
    pub category: String,
    pub snippet: String,
    pub score: f32,
}

/// Sentinel text rendered when retrieval surfaced nothing.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant knowledge found.";

/// Ordered retrieval results, closest first. An empty sequence is a valid
/// terminal state, not an error.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Render the context for the generation prompt. Each passage is headed
    /// by `[source | category]`; passages are separated by `---` rules.
    pub fn render(&self) -> String {
        if self.passages.is_empty() {
            return NO_CONTEXT_SENTINEL.to_string();
        }
        self.passages
            .iter()
            .map(|p| format!("[{} | {}]\n{}\n", p.source, p.category, p.snippet))
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    /// Source identifiers surfaced by this retrieval, in rank order with
    /// duplicates removed. This is a field read, not text parsing, so the
    /// audit trail cannot drift from what the generator actually saw.
    pub fn cited_sources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.passages
            .iter()
            .filter(|p| seen.insert(p.source.clone()))
            .map(|p| p.source.clone())
            .collect()
    }
}

/// Elapsed time for one orchestration stage, recorded into the run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One append-only audit entry per pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: String,
    /// ISO-8601 start timestamp.
    pub timestamp: String,
    pub duration_seconds: f64,
    pub input_length: usize,
    /// Capability invocations, in order. Skipped stages do not appear.
    pub tool_calls: Vec<String>,
    /// Sources surfaced in the context actually passed to generation.
    pub sources_cited: Vec<String>,
    /// True when retrieval was unavailable (missing/corrupt index) or failed.
    pub retrieval_degraded: bool,
    pub stages: Vec<StageTiming>,
    pub final_output: String,
}
