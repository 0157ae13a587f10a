//! Building blocks for the three pipeline stages.
//!
//! Each submodule does one job and knows nothing about the others; the
//! stage wiring lives in [`crate::controller`].
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ extract ──▶ analyze ──▶ parse ──▶ store
//! (HTTP)    (lopdf)     (LLM)       (JSON)    (JSONL)
//! └─ ExtractPdf stage ┘ └─ Analyze stage ───┘ └ Store ┘
//! ```
//!
//! 1. [`fetch`]: GET the PDF URL; non-success status is fatal
//! 2. [`extract`]: per-page text in document order, space-joined
//! 3. [`analyze`]: the [`analyze::Analyzer`] seam and its LLM implementation
//! 4. [`parse`]: fence stripping and JSON parsing with a malformed fallback
//! 5. [`store`]: append-only JSON Lines log

pub mod analyze;
pub mod extract;
pub mod fetch;
pub mod parse;
pub mod store;
