//! Error types for the qfin-digest library.
//!
//! Failures split into two families:
//!
//! * [`DigestError`] is **fatal** for one paper's run. The PDF could not be
//!   fetched, the LLM call failed, the log could not be written. Returned as
//!   `Err(DigestError)` from [`crate::controller::Pipeline::run`] and never
//!   caught inside the pipeline. Whoever drives the pipeline (see
//!   [`crate::batch`]) decides whether to retry, skip or abort.
//!
//! * Malformed model output: **Not an error**. A response that does not
//!   parse as a JSON object becomes [`crate::output::AnalysisRecord::Malformed`]
//!   and is persisted like any other result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the qfin-digest library.
#[derive(Debug, Error)]
pub enum DigestError {
    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The PDF download failed: non-success HTTP status or network failure.
    ///
    /// `status` is `None` when no HTTP response was received at all.
    #[error("Failed to fetch PDF from '{url}' ({}): {detail}", status_label(.status))]
    Fetch {
        url: String,
        status: Option<u16>,
        detail: String,
    },

    /// The response body was received but is not a PDF.
    #[error("Body fetched from '{url}' is not a PDF\nFirst bytes: {magic:?}")]
    NotAPdf { url: String, magic: Vec<u8> },

    /// The body starts like a PDF but could not be parsed.
    #[error("PDF from '{url}' is corrupt: {detail}")]
    CorruptPdf { url: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM call failed (transport, auth, quota or service error).
    #[error("LLM analysis call failed: {detail}")]
    AnalysisService { detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Could not open or append to the output log.
    #[error("Failed to append to output log '{path}': {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read the output log back.
    #[error("Failed to read output log '{path}': {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The paper index file could not be read or parsed.
    #[error("Failed to load paper index '{path}': {detail}")]
    IndexLoad { path: PathBuf, detail: String },

    // ── Pipeline wiring ───────────────────────────────────────────────────
    /// A stage ran without a field an earlier stage should have populated,
    /// or finished without populating a field it promised.
    #[error("Stage '{stage}' found no '{field}' in the pipeline state")]
    MissingStateField {
        stage: &'static str,
        field: &'static str,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

impl DigestError {
    /// Whether re-running the whole paper might succeed.
    ///
    /// Network failures, 5xx and 429 responses and LLM service errors are
    /// transient. Client errors such as 404, bad PDFs and local I/O are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DigestError::Fetch { status: None, .. } => true,
            DigestError::Fetch {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            DigestError::AnalysisService { .. } => true,
            _ => false,
        }
    }

    /// HTTP status attached to a fetch failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DigestError::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}
