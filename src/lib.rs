//! # qfin-digest
//!
//! Turn quantitative-finance papers into structured JSON with an LLM.
//!
//! Given a paper reference (id, title, PDF URL, abstract URL) the crate
//! downloads the PDF, extracts its text, asks a language model which
//! mathematical formulas the paper uses and where they apply, and appends
//! the answer to a JSON Lines log. A model reply that is not a JSON object
//! is still logged, as a malformed record carrying an excerpt of the raw
//! reply.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PaperRef
//!  │
//!  ├─ 1. ExtractPdf  GET the PDF, extract per-page text (lopdf, spawn_blocking)
//!  ├─ 2. Analyze     capped text prefix → prompt → LLM → fence strip → JSON
//!  └─ 3. Store       append one LogEntry line to the JSONL log
//! ```
//!
//! Stages run strictly in sequence and the first error aborts the run.
//! Retrying, throttling and resuming are the job of the caller;
//! [`process_batch`] is the one this crate ships.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qfin_digest::{DigestConfig, PaperRef, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from EDGEQUAKE_LLM_PROVIDER / GEMINI_API_KEY / …
//!     let config = DigestConfig::default();
//!     let pipeline = Pipeline::from_config(&config)?;
//!
//!     let paper = PaperRef::new(
//!         "2401.00001",
//!         "Rough Volatility Revisited",
//!         "https://arxiv.org/pdf/2401.00001",
//!         "https://arxiv.org/abs/2401.00001",
//!     );
//!     let entry = pipeline.run(paper).await?;
//!     println!("{}", serde_json::to_string_pretty(&entry)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `qfin-digest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! qfin-digest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod output;
pub mod paper;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_batch, BatchReport, FailedPaper};
pub use config::{BatchOptions, DigestConfig, DigestConfigBuilder};
pub use controller::{
    process_paper, AnalyzeStage, ExtractPdfStage, Pipeline, PipelineBuilder, PipelineState,
    Stage, StageFuture, StateField, StoreStage,
};
pub use error::DigestError;
pub use output::{AnalysisRecord, FinancialAnalysis, LogEntry, SourceUrls};
pub use paper::{load_index, PaperRef};
pub use pipeline::analyze::{Analyzer, LlmAnalyzer};
pub use pipeline::store::ResultStore;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
