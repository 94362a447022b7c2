//! # RFP Copilot
//!
//! A document-grounded generation pipeline for proposal teams: ingest a
//! knowledge corpus, build a persisted vector index, and turn raw RFP
//! text into a cited draft response with an auditable record of every
//! run.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Corpus    │──▶│  Chunk+Embed │──▶│ Vector Index  │
//! │ (dir tree) │   │   (build)    │   │ (SQLite dir)  │
//! └───────────┘   └──────────────┘   └──────┬────────┘
//!                                           │ load (read-only)
//!                 ┌─────────────────────────▼─────────┐
//!  raw RFP ──────▶│ extract → retrieve → generate      │──▶ draft
//!                 │          (pipeline)                │
//!                 └─────────────────┬──────────────────┘
//!                                   ▼
//!                          audit_log.jsonl (append-only)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rfp build                    # chunk + embed the knowledge corpus
//! rfp query "Veeva guidelines" # inspect retrieval
//! rfp run proposal_request.txt # full pipeline, draft + audit record
//! rfp audit --limit 5          # review recent runs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`corpus`] | Knowledge-corpus loader |
//! | [`chunk`] | Fixed-size overlapping chunker |
//! | [`embedding`] | Embedding capability abstraction |
//! | [`index`] | Vector index build/load/search |
//! | [`provision`] | Remote index fetch (S3) |
//! | [`retrieve`] | Top-K similarity retrieval |
//! | [`capability`] | Shared chat-completion client |
//! | [`extract`] | Structured-requirements extraction |
//! | [`generate`] | Cited draft generation |
//! | [`pipeline`] | Extract→retrieve→generate orchestration |
//! | [`audit`] | Append-only audit log |
//! | [`stats`] | Corpus/index/log overview |

pub mod audit;
pub mod capability;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod provision;
pub mod retrieve;
pub mod stats;
