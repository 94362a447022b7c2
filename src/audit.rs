//! Append-only audit log.
//!
//! One JSON record per pipeline run, one record per line. Records are
//! derived purely from the run trace; citations are read from the
//! structured retrieved context rather than re-parsed out of prompt text,
//! so the audit trail always matches what the generator actually saw.
//!
//! Appends use a single `write_all` of the full line on a file opened in
//! append mode. That is sufficient to keep concurrent runs within one
//! process from interleaving; true multi-process writers would need
//! external locking, which is out of scope and documented as a
//! limitation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::models::{AuditRecord, RetrievedContext, StageTiming};

/// Derive the audit record for one run from its trace.
///
/// `generated_context` is the retrieved context actually passed to the
/// generation capability; `None` when generation was short-circuited, in
/// which case nothing is cited.
#[allow(clippy::too_many_arguments)]
pub fn build_record(
    run_id: String,
    started: DateTime<Utc>,
    duration: Duration,
    input_length: usize,
    tool_calls: Vec<String>,
    generated_context: Option<&RetrievedContext>,
    retrieval_degraded: bool,
    stages: Vec<StageTiming>,
    final_output: String,
) -> AuditRecord {
    AuditRecord {
        run_id,
        timestamp: started.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        duration_seconds: duration.as_secs_f64(),
        input_length,
        tool_calls,
        sources_cited: generated_context
            .map(|ctx| ctx.cited_sources())
            .unwrap_or_default(),
        retrieval_degraded,
        stages,
        final_output,
    }
}

/// Append one record to the log as a single JSON line.
///
/// A failure here must not destroy the computed result — callers report
/// it and still return the final text.
pub fn append_record(path: &Path, record: &AuditRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut line = serde_json::to_string(record).context("Failed to serialize audit record")?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;

    file.write_all(line.as_bytes())
        .with_context(|| format!("Failed to append to audit log: {}", path.display()))?;

    Ok(())
}

/// Read the most recent `limit` records. Malformed lines are skipped, not
/// fatal — the log only ever grows and is never rewritten.
pub fn read_records(path: &Path, limit: usize) -> Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read audit log: {}", path.display()))?;

    let records: Vec<AuditRecord> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let skip = records.len().saturating_sub(limit);
    Ok(records.into_iter().skip(skip).collect())
}
