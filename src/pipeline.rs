//! Pipeline orchestration: extract → retrieve → generate → audit.
//!
//! One [`Pipeline`] value owns the injected capabilities and can serve
//! any number of concurrent runs; each run carries its own trace and
//! shares only the read-only index behind the retriever and the
//! append-only audit log.
//!
//! The pipeline degrades instead of failing: every stage produces either
//! a valid value or an error-tagged value of the shape the next stage
//! expects, so a run always completes and always returns something
//! displayable. Capability failures surface in the output text and the
//! audit record, never as a crash. No retries happen at this layer;
//! retrying is the capability's own concern.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::audit;
use crate::extract::RequirementExtractor;
use crate::generate::{DraftGenerator, EMPTY_REQUIREMENTS_MSG};
use crate::models::{
    AuditRecord, ExtractionOutcome, Requirements, RetrievedContext, StageTiming,
};
use crate::retrieve::Retriever;

/// Characters of raw input preserved in a degraded extraction outcome.
const RAW_EXCERPT_CHARS: usize = 500;

/// Result of one pipeline run: the displayable output plus its audit
/// record. The record has already been appended to the log (or the
/// failure to do so reported on stderr).
#[derive(Debug)]
pub struct PipelineRun {
    pub final_output: String,
    pub audit: AuditRecord,
}

pub struct Pipeline {
    extractor: Arc<dyn RequirementExtractor>,
    generator: Arc<dyn DraftGenerator>,
    /// `None` means retrieval is disabled (missing or corrupt index); runs
    /// proceed with empty context and the degradation is recorded.
    retriever: Option<Arc<Retriever>>,
    top_k: usize,
    audit_log: PathBuf,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn RequirementExtractor>,
        generator: Arc<dyn DraftGenerator>,
        retriever: Option<Arc<Retriever>>,
        top_k: usize,
        audit_log: PathBuf,
    ) -> Self {
        Self {
            extractor,
            generator,
            retriever,
            top_k,
            audit_log,
        }
    }

    pub fn retrieval_enabled(&self) -> bool {
        self.retriever.is_some()
    }

    /// Run the full pipeline over one raw RFP text.
    pub async fn run(&self, raw_text: &str) -> PipelineRun {
        let started = Utc::now();
        let run_timer = Instant::now();
        let run_id = format!(
            "RFP-{}-{}",
            started.format("%Y%m%d"),
            &Uuid::new_v4().to_string()[..8]
        );

        let mut stages: Vec<StageTiming> = Vec::new();
        let mut tool_calls: Vec<String> = Vec::new();

        // Start → Extracted
        let stage_timer = Instant::now();
        tool_calls.push("extract_requirements".to_string());
        let outcome = match self.extractor.extract(raw_text).await {
            Ok(requirements) => ExtractionOutcome::Extracted(requirements),
            Err(e) => ExtractionOutcome::Degraded {
                error: e.to_string(),
                raw_excerpt: raw_text.chars().take(RAW_EXCERPT_CHARS).collect(),
            },
        };
        stages.push(stage_timing(
            "extract",
            stage_timer,
            match &outcome {
                ExtractionOutcome::Extracted(_) => None,
                ExtractionOutcome::Degraded { error, .. } => {
                    Some(format!("degraded: {}", error))
                }
            },
        ));

        // Extracted → Retrieved
        let stage_timer = Instant::now();
        let mut retrieval_degraded = false;
        let (context, retrieve_note) = match (&outcome, &self.retriever) {
            (ExtractionOutcome::Degraded { .. }, _) => (
                RetrievedContext::empty(),
                Some("skipped: extraction degraded".to_string()),
            ),
            (ExtractionOutcome::Extracted(_), None) => {
                retrieval_degraded = true;
                (
                    RetrievedContext::empty(),
                    Some("retrieval disabled: no index loaded".to_string()),
                )
            }
            (ExtractionOutcome::Extracted(requirements), Some(retriever)) => {
                let query = build_query(requirements);
                tool_calls.push("search_knowledge".to_string());
                match retriever.query(&query, self.top_k).await {
                    Ok(context) => (context, None),
                    Err(e) => {
                        retrieval_degraded = true;
                        (
                            RetrievedContext::empty(),
                            Some(format!("degraded: {}", e)),
                        )
                    }
                }
            }
        };
        stages.push(stage_timing("retrieve", stage_timer, retrieve_note));

        // Retrieved → Generated. The precondition lives here, not in the
        // generator: degraded or empty requirements short-circuit before
        // any capability call is made.
        let stage_timer = Instant::now();
        let mut generated_with_context = false;
        let (final_output, generate_note) = match &outcome {
            ExtractionOutcome::Degraded { error, .. } => (
                format!(
                    "ERROR: requirement extraction failed ({}). Draft generation skipped.",
                    error
                ),
                Some("skipped: extraction degraded".to_string()),
            ),
            ExtractionOutcome::Extracted(requirements) if requirements.is_empty() => (
                EMPTY_REQUIREMENTS_MSG.to_string(),
                Some("short-circuit: empty requirements".to_string()),
            ),
            ExtractionOutcome::Extracted(requirements) => {
                tool_calls.push("generate_response".to_string());
                generated_with_context = true;
                match self.generator.generate(requirements, &context).await {
                    Ok(text) => (text, None),
                    Err(e) => (format!("Generation failed: {}", e), Some("degraded".to_string())),
                }
            }
        };
        stages.push(stage_timing("generate", stage_timer, generate_note));

        // Generated → Audited
        let stage_timer = Instant::now();
        let mut record = audit::build_record(
            run_id,
            started,
            run_timer.elapsed(),
            raw_text.len(),
            tool_calls,
            generated_with_context.then_some(&context),
            retrieval_degraded,
            Vec::new(),
            final_output.clone(),
        );
        stages.push(stage_timing("audit", stage_timer, None));
        record.stages = stages;

        if let Err(e) = audit::append_record(&self.audit_log, &record) {
            // The computed result survives a logging failure.
            eprintln!("Warning: failed to append audit record: {}", e);
        }

        PipelineRun {
            final_output,
            audit: record,
        }
    }
}

/// Construct the retrieval query from a fixed subset of the extracted
/// requirements. Scope and key requirements are deliberately left out;
/// widening the query is a recall tradeoff, not a contract.
fn build_query(requirements: &Requirements) -> String {
    format!(
        "{} {} {}",
        requirements.project_type, requirements.client, requirements.budget_range
    )
    .trim()
    .to_string()
}

fn stage_timing(stage: &str, timer: Instant, note: Option<String>) -> StageTiming {
    StageTiming {
        stage: stage.to_string(),
        elapsed_ms: timer.elapsed().as_millis() as u64,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::embedding::Embedder;
    use crate::index::{build_index, VectorIndex};
    use crate::models::{Document, DocumentMeta};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct HashEmbedder {
        dims: usize,
    }

    fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for token in text.to_lowercase().split_whitespace() {
            let mut h: usize = 0;
            for b in token.bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % dims] += 1.0;
        }
        v
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash-test"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
        }
    }

    struct FixedExtractor {
        requirements: Requirements,
    }

    #[async_trait]
    impl RequirementExtractor for FixedExtractor {
        async fn extract(&self, _rfp_text: &str) -> Result<Requirements> {
            Ok(self.requirements.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl RequirementExtractor for FailingExtractor {
        async fn extract(&self, _rfp_text: &str) -> Result<Requirements> {
            anyhow::bail!("model unavailable")
        }
    }

    /// Counts invocations so tests can prove the short-circuit never
    /// reached the capability.
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    impl CountingGenerator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DraftGenerator for CountingGenerator {
        async fn generate(
            &self,
            _requirements: &Requirements,
            context: &RetrievedContext,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("DRAFT citing: {}", context.cited_sources().join(", ")))
        }
    }

    fn veeva_requirements() -> Requirements {
        Requirements {
            client: "AstraZeneca".to_string(),
            project_type: "Phase III Oncology".to_string(),
            scope: "Global sites".to_string(),
            budget_range: "$3.2M - $4.1M".to_string(),
            timeline: "24 months".to_string(),
            submission_deadline: "2025-12-15".to_string(),
            key_requirements: vec![
                "Adaptive design".to_string(),
                "RWE integration".to_string(),
                "Veeva Vault compliance".to_string(),
            ],
        }
    }

    async fn veeva_retriever(dims: usize) -> (tempfile::TempDir, Arc<Retriever>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let docs = vec![Document {
            body: "All trials must use Veeva Vault for document management.".to_string(),
            meta: DocumentMeta {
                source: "veeva_policy.txt".to_string(),
                category: "compliance".to_string(),
                path: "compliance/veeva_policy.txt".to_string(),
            },
        }];
        let chunking = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 20,
        };
        build_index(&docs, &HashEmbedder { dims }, &chunking, 16, &dir)
            .await
            .unwrap();
        let index = Arc::new(VectorIndex::load(&dir, "hash-test", dims).await.unwrap());
        let retriever =
            Retriever::new(index, Arc::new(HashEmbedder { dims }), 500).unwrap();
        (tmp, Arc::new(retriever))
    }

    fn audit_path(tmp: &tempfile::TempDir) -> PathBuf {
        tmp.path().join("audit_log.jsonl")
    }

    #[tokio::test]
    async fn test_full_run_cites_retrieved_sources() {
        let (tmp, retriever) = veeva_retriever(32).await;
        let generator = CountingGenerator::new();
        let pipeline = Pipeline::new(
            Arc::new(FixedExtractor {
                requirements: veeva_requirements(),
            }),
            generator.clone(),
            Some(retriever),
            1,
            audit_path(&tmp),
        );

        let run = pipeline.run("RFP Title: Phase III Oncology Trial Support").await;

        assert_eq!(generator.call_count(), 1);
        assert!(run.final_output.contains("veeva_policy.txt"));
        assert_eq!(run.audit.sources_cited, vec!["veeva_policy.txt"]);
        assert_eq!(
            run.audit.tool_calls,
            vec!["extract_requirements", "search_knowledge", "generate_response"]
        );
        assert!(!run.audit.retrieval_degraded);

        // The record also landed in the log.
        let records = audit::read_records(&audit_path(&tmp), 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, run.audit.run_id);
    }

    #[tokio::test]
    async fn test_degraded_extraction_short_circuits_generation() {
        let (tmp, retriever) = veeva_retriever(32).await;
        let generator = CountingGenerator::new();
        let pipeline = Pipeline::new(
            Arc::new(FailingExtractor),
            generator.clone(),
            Some(retriever),
            1,
            audit_path(&tmp),
        );

        let run = pipeline.run("some rfp text").await;

        assert_eq!(generator.call_count(), 0, "generator must not be invoked");
        assert!(run.final_output.starts_with("ERROR: requirement extraction failed"));
        assert!(run.final_output.contains("model unavailable"));
        assert_eq!(run.audit.tool_calls, vec!["extract_requirements"]);
        assert!(run.audit.sources_cited.is_empty());
    }

    #[tokio::test]
    async fn test_empty_requirements_short_circuit_literal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let generator = CountingGenerator::new();
        let pipeline = Pipeline::new(
            Arc::new(FixedExtractor {
                requirements: Requirements::default(),
            }),
            generator.clone(),
            None,
            5,
            audit_path(&tmp),
        );

        let run = pipeline.run("rfp").await;

        assert_eq!(run.final_output, EMPTY_REQUIREMENTS_MSG);
        assert_eq!(generator.call_count(), 0);
        // No generation tool call is logged for the short-circuited stage.
        assert!(!run
            .audit
            .tool_calls
            .iter()
            .any(|t| t == "generate_response"));
    }

    #[tokio::test]
    async fn test_missing_index_degrades_not_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let generator = CountingGenerator::new();
        let pipeline = Pipeline::new(
            Arc::new(FixedExtractor {
                requirements: veeva_requirements(),
            }),
            generator.clone(),
            None,
            5,
            audit_path(&tmp),
        );

        let run = pipeline.run("rfp").await;

        assert_eq!(generator.call_count(), 1);
        assert!(run.audit.retrieval_degraded);
        assert!(run.audit.sources_cited.is_empty());
        assert_eq!(
            run.audit.tool_calls,
            vec!["extract_requirements", "generate_response"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_write_independent_records() {
        let (tmp, retriever) = veeva_retriever(32).await;
        let log = audit_path(&tmp);
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(FixedExtractor {
                requirements: veeva_requirements(),
            }),
            CountingGenerator::new(),
            Some(retriever),
            1,
            log.clone(),
        ));

        let a = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.run("first concurrent rfp").await })
        };
        let b = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.run("second concurrent rfp").await })
        };
        let (run_a, run_b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(run_a.audit.run_id, run_b.audit.run_id);

        // Every line in the log must parse; nothing interleaved.
        let content = std::fs::read_to_string(&log).unwrap();
        let parsed: Vec<AuditRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("corrupt audit line"))
            .collect();
        assert_eq!(parsed.len(), 2);
        let mut ids: Vec<&str> = parsed.iter().map(|r| r.run_id.as_str()).collect();
        ids.sort();
        let mut expected = vec![run_a.audit.run_id.as_str(), run_b.audit.run_id.as_str()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_query_built_from_fixed_field_subset() {
        let query = build_query(&veeva_requirements());
        assert_eq!(query, "Phase III Oncology AstraZeneca $3.2M - $4.1M");
    }
}
