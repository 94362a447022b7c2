//! # RFP Copilot CLI (`rfp`)
//!
//! The `rfp` binary is the primary interface for the pipeline. It provides
//! commands for building the vector index from a knowledge corpus,
//! provisioning a prebuilt index from object storage, inspecting
//! retrieval, running the full extract→retrieve→generate pipeline, and
//! reviewing the audit trail.
//!
//! ## Usage
//!
//! ```bash
//! rfp --config ./rfp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rfp build` | Chunk and embed the corpus into a fresh index |
//! | `rfp fetch` | Download a prebuilt index from S3 |
//! | `rfp query "<text>"` | Show the top-K retrieved passages |
//! | `rfp run [FILE]` | Generate a cited draft from RFP text (file or stdin) |
//! | `rfp stats` | Corpus / index / audit-log summary |
//! | `rfp audit` | Print recent audit records |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use rfp_copilot::config::{self, Config};
use rfp_copilot::corpus::load_corpus;
use rfp_copilot::embedding::create_embedder;
use rfp_copilot::extract::create_extractor;
use rfp_copilot::generate::create_generator;
use rfp_copilot::index::{build_index, IndexError, VectorIndex};
use rfp_copilot::pipeline::Pipeline;
use rfp_copilot::provision::{fetch_remote_index, FetchOutcome};
use rfp_copilot::retrieve::Retriever;
use rfp_copilot::{audit, chunk, stats};

/// RFP Copilot — a document-grounded RFP response pipeline.
#[derive(Parser)]
#[command(
    name = "rfp",
    about = "RFP Copilot — retrieval-augmented, audited RFP response drafting",
    version,
    long_about = "RFP Copilot ingests a curated knowledge corpus into a vector index, then \
    turns raw RFP text into a cited draft response: structured requirements are extracted, \
    supporting passages retrieved, and a draft generated, with one append-only audit record \
    per run."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./rfp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from the knowledge corpus.
    ///
    /// Loads every matching corpus file, chunks it, embeds every chunk,
    /// and atomically replaces the persisted index. The build fails whole
    /// if any embedding call fails; a partial index is never written.
    Build {
        /// Show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to include.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fetch a prebuilt index from the configured S3 location.
    ///
    /// Absence of a remote copy is reported as degraded mode, not an
    /// error. An existing local index is left untouched.
    Fetch,

    /// Show the passages retrieval would feed to generation.
    Query {
        /// The query text.
        query: String,

        /// Number of passages to return.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Run the full pipeline over RFP text from FILE (or stdin).
    Run {
        /// Path to the raw RFP text. Reads stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Corpus, index, and audit-log overview.
    Stats,

    /// Print the most recent audit records.
    Audit {
        /// Number of records to show.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { dry_run, limit } => run_build(&cfg, dry_run, limit).await?,
        Commands::Fetch => run_fetch(&cfg).await?,
        Commands::Query { query, k } => run_query(&cfg, &query, k).await?,
        Commands::Run { file } => run_pipeline(&cfg, file).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
        Commands::Audit { limit } => run_audit(&cfg, limit)?,
    }

    Ok(())
}

async fn run_build(cfg: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let mut documents = load_corpus(&cfg.corpus)?;
    if let Some(lim) = limit {
        documents.truncate(lim);
    }

    if dry_run {
        let total_chunks: usize = documents
            .iter()
            .map(|doc| {
                chunk::split_document(doc, cfg.chunking.chunk_size, cfg.chunking.chunk_overlap)
                    .len()
            })
            .sum();
        println!("build (dry-run)");
        println!("  documents found: {}", documents.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let embedder = create_embedder(&cfg.embedding)?;
    let report = build_index(
        &documents,
        embedder.as_ref(),
        &cfg.chunking,
        cfg.embedding.batch_size,
        &cfg.index.dir,
    )
    .await?;

    println!("build");
    println!("  documents: {}", report.documents);
    println!("  chunks embedded: {}", report.chunks);
    println!("  model: {} ({} dims)", report.model, report.dims);
    println!("  index written to {}", cfg.index.dir.display());
    println!("ok");
    Ok(())
}

async fn run_fetch(cfg: &Config) -> Result<()> {
    let remote = cfg
        .remote
        .as_ref()
        .context("No [remote] index location configured")?;

    match fetch_remote_index(remote, &cfg.index.dir).await? {
        FetchOutcome::AlreadyPresent => {
            println!("Index already present at {}", cfg.index.dir.display());
        }
        FetchOutcome::Fetched(count) => {
            println!(
                "Fetched {} objects from s3://{}/{} into {}",
                count,
                remote.bucket,
                remote.prefix,
                cfg.index.dir.display()
            );
        }
        FetchOutcome::RemoteEmpty => {
            println!("No remote index found. Retrieval disabled.");
        }
    }
    Ok(())
}

/// Load the index and pair it with the embedding capability, or explain
/// why retrieval is unavailable. When no local index exists and a remote
/// location is configured, one provisioning attempt is made first.
/// Missing or corrupt indexes degrade the system; they never abort it.
async fn setup_retriever(cfg: &Config) -> std::result::Result<Retriever, String> {
    let embedder = match create_embedder(&cfg.embedding) {
        Ok(e) => e,
        Err(e) => return Err(e.to_string()),
    };

    let mut loaded =
        VectorIndex::load(&cfg.index.dir, embedder.model_name(), embedder.dims()).await;

    if matches!(loaded, Err(IndexError::NotFound(_))) {
        if let Some(remote) = &cfg.remote {
            match fetch_remote_index(remote, &cfg.index.dir).await {
                Ok(FetchOutcome::Fetched(count)) => {
                    eprintln!("Fetched remote index ({} objects)", count);
                    loaded =
                        VectorIndex::load(&cfg.index.dir, embedder.model_name(), embedder.dims())
                            .await;
                }
                Ok(_) => {}
                Err(e) => eprintln!("Warning: remote index fetch failed: {}", e),
            }
        }
    }

    let index = match loaded {
        Ok(index) => Arc::new(index),
        Err(IndexError::NotFound(path)) => {
            return Err(format!(
                "no index at {} (run `rfp build` or `rfp fetch`)",
                path.display()
            ));
        }
        Err(e @ IndexError::Corrupt { .. }) => return Err(e.to_string()),
    };

    Retriever::new(index, embedder, cfg.retrieval.max_snippet_chars).map_err(|e| e.to_string())
}

async fn run_query(cfg: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let retriever = match setup_retriever(cfg).await {
        Ok(r) => r,
        Err(reason) => {
            println!("Retrieval disabled: {}", reason);
            return Ok(());
        }
    };

    let k = k.unwrap_or(cfg.retrieval.top_k);
    let context = retriever.query(query, k).await?;

    if context.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, passage) in context.passages.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} / {}",
            i + 1,
            passage.score,
            passage.source,
            passage.category
        );
        println!(
            "    excerpt: \"{}\"",
            passage.snippet.replace('\n', " ").trim()
        );
        println!();
    }
    Ok(())
}

async fn run_pipeline(cfg: &Config, file: Option<PathBuf>) -> Result<()> {
    let raw_text = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read RFP file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read RFP text from stdin")?;
            buf
        }
    };

    let retriever = match setup_retriever(cfg).await {
        Ok(r) => Some(Arc::new(r)),
        Err(reason) => {
            eprintln!("Warning: retrieval disabled: {}", reason);
            None
        }
    };

    let pipeline = Pipeline::new(
        create_extractor(&cfg.llm),
        create_generator(&cfg.llm)?,
        retriever,
        cfg.retrieval.top_k,
        cfg.audit.log_path.clone(),
    );

    let run = pipeline.run(&raw_text).await;

    println!("{}", run.final_output);
    println!();
    println!("run {}", run.audit.run_id);
    println!("  duration: {:.1}s", run.audit.duration_seconds);
    println!("  tools: {}", run.audit.tool_calls.join(", "));
    println!(
        "  sources cited: {}",
        if run.audit.sources_cited.is_empty() {
            "(none)".to_string()
        } else {
            run.audit.sources_cited.join(", ")
        }
    );
    if run.audit.retrieval_degraded {
        println!("  retrieval: degraded");
    }
    println!("  audit appended to {}", cfg.audit.log_path.display());
    Ok(())
}

fn run_audit(cfg: &Config, limit: usize) -> Result<()> {
    let records = audit::read_records(&cfg.audit.log_path, limit)?;
    if records.is_empty() {
        println!("No audit records.");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {}  {:.1}s",
            record.run_id, record.timestamp, record.duration_seconds
        );
        println!("  tools: {}", record.tool_calls.join(", "));
        println!(
            "  sources: {}",
            if record.sources_cited.is_empty() {
                "(none)".to_string()
            } else {
                record.sources_cited.join(", ")
            }
        );
        let preview: String = record.final_output.chars().take(120).collect();
        println!("  output: {}", preview.replace('\n', " "));
        println!();
    }
    Ok(())
}
