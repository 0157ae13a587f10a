//! Progress-callback trait for batch processing events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::batch::process_batch`] to receive events as each paper is
//! attempted. The CLI uses it to drive a terminal progress bar; library
//! callers can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use qfin_digest::{BatchProgressCallback, LogEntry};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_paper_complete(&self, index: usize, total: usize, entry: &LogEntry) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{}: {}", index + 1, total, entry.id);
//!     }
//! }
//! ```

use crate::batch::BatchReport;
use crate::output::LogEntry;
use std::sync::Arc;

/// Called by the batch driver as it processes papers.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 0-based within the batch.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first paper.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before each attempt at a paper, including retries.
    fn on_paper_start(&self, index: usize, total: usize, paper_id: &str) {
        let _ = (index, total, paper_id);
    }

    /// Called when a paper's entry has been appended to the log.
    fn on_paper_complete(&self, index: usize, total: usize, entry: &LogEntry) {
        let _ = (index, total, entry);
    }

    /// Called when a paper failed for good.
    fn on_paper_error(&self, index: usize, total: usize, paper_id: &str, error: &str) {
        let _ = (index, total, paper_id, error);
    }

    /// Called when a paper is skipped without being attempted.
    fn on_paper_skipped(&self, index: usize, total: usize, paper_id: &str, reason: &str) {
        let _ = (index, total, paper_id, reason);
    }

    /// Called once after every paper has been attempted or skipped.
    fn on_batch_complete(&self, report: &BatchReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
