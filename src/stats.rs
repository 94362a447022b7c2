//! Corpus, index, and audit-log overview.
//!
//! Gives quick confidence that builds and runs are working as expected:
//! how many documents the corpus holds, what the persisted index was
//! built with, and how many runs the audit log has recorded.

use anyhow::Result;

use crate::audit;
use crate::config::Config;
use crate::corpus::load_corpus;
use crate::index::{read_meta, IndexError};

pub async fn run_stats(config: &Config) -> Result<()> {
    println!("RFP Copilot — Pipeline Stats");
    println!("============================");
    println!();

    // Corpus
    println!("  Corpus root:  {}", config.corpus.root.display());
    match load_corpus(&config.corpus) {
        Ok(docs) => {
            let total_bytes: usize = docs.iter().map(|d| d.body.len()).sum();
            println!("  Documents:    {}", docs.len());
            println!("  Total size:   {}", format_bytes(total_bytes as u64));
        }
        Err(e) => println!("  Documents:    unavailable ({})", e),
    }
    println!();

    // Index
    println!("  Index dir:    {}", config.index.dir.display());
    match read_meta(&config.index.dir).await {
        Ok(meta) => {
            println!("  Status:       OK");
            println!("  Model:        {} ({} dims)", meta.model, meta.dims);
            println!(
                "  Chunks:       {} (from {} documents)",
                meta.chunk_count, meta.document_count
            );
            println!(
                "  Chunking:     size {} / overlap {}",
                meta.chunk_size, meta.chunk_overlap
            );
            let built = chrono::DateTime::from_timestamp(meta.built_at, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| meta.built_at.to_string());
            println!("  Built at:     {}", built);
        }
        Err(IndexError::NotFound(_)) => {
            println!("  Status:       NOT BUILT (run `rfp build` or `rfp fetch`)");
        }
        Err(IndexError::Corrupt { reason, .. }) => {
            println!("  Status:       CORRUPT ({})", reason);
        }
    }
    println!();

    // Audit log
    println!("  Audit log:    {}", config.audit.log_path.display());
    let runs = audit::read_records(&config.audit.log_path, usize::MAX)?;
    println!("  Runs logged:  {}", runs.len());

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
