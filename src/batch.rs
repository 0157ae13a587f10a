//! Batch driver: feed many papers through one [`Pipeline`], one at a time.
//!
//! The pipeline aborts a run on the first error and never retries. This
//! module is the caller that decides what happens next: transient failures
//! are retried as whole runs with exponential backoff, everything else is
//! recorded and the batch moves on. A failed paper leaves no entry in the
//! log and does not affect the papers after it.

use crate::config::BatchOptions;
use crate::controller::Pipeline;
use crate::error::DigestError;
use crate::output::LogEntry;
use crate::paper::PaperRef;
use crate::pipeline::store::ResultStore;
use crate::progress::ProgressCallback;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// A paper that failed after all attempts.
#[derive(Debug, Clone, Serialize)]
pub struct FailedPaper {
    pub id: String,
    pub attempts: u32,
    pub error: String,
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Papers whose entry was written with a parsed analysis.
    pub succeeded: usize,
    /// Papers whose entry was written with a malformed analysis.
    pub malformed: usize,
    /// Papers that produced no entry.
    pub failed: Vec<FailedPaper>,
    /// Papers not attempted (duplicates, already in the log, past the limit).
    pub skipped: usize,
    pub total_duration_ms: u64,
}

impl BatchReport {
    /// Entries written during this batch.
    pub fn written(&self) -> usize {
        self.succeeded + self.malformed
    }
}

/// Process `papers` in order through `pipeline`.
///
/// When `options.skip_processed` is set, ids already present in `store`
/// are skipped so an interrupted batch can be resumed.
///
/// # Errors
/// Only reading the existing log can fail the batch as a whole; per-paper
/// failures are collected in [`BatchReport::failed`].
pub async fn process_batch(
    pipeline: &Pipeline,
    store: &ResultStore,
    papers: &[PaperRef],
    options: &BatchOptions,
    progress: Option<&ProgressCallback>,
) -> Result<BatchReport, DigestError> {
    let start = Instant::now();
    let mut report = BatchReport::default();

    let mut seen: HashSet<String> = if options.skip_processed {
        store.processed_ids().await?
    } else {
        HashSet::new()
    };
    if !seen.is_empty() {
        info!("{} papers already in {}", seen.len(), store.path().display());
    }

    let total = papers.len();
    if let Some(cb) = progress {
        cb.on_batch_start(total);
    }

    let mut attempted = 0usize;
    for (index, paper) in papers.iter().enumerate() {
        let skip_reason = if options.limit.is_some_and(|limit| attempted >= limit) {
            Some("batch limit reached")
        } else if seen.contains(&paper.id) {
            Some("already processed")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            report.skipped += 1;
            if let Some(cb) = progress {
                cb.on_paper_skipped(index, total, &paper.id, reason);
            }
            continue;
        }

        if attempted > 0 && options.throttle_ms > 0 {
            sleep(Duration::from_millis(options.throttle_ms)).await;
        }
        attempted += 1;

        match run_with_retry(pipeline, paper, index, total, options, progress).await {
            Ok(entry) => {
                seen.insert(paper.id.clone());
                if entry.analysis.is_success() {
                    report.succeeded += 1;
                } else {
                    report.malformed += 1;
                }
                if let Some(cb) = progress {
                    cb.on_paper_complete(index, total, &entry);
                }
            }
            Err((attempts, e)) => {
                warn!("Paper {} failed after {} attempt(s): {}", paper.id, attempts, e);
                if let Some(cb) = progress {
                    cb.on_paper_error(index, total, &paper.id, &e.to_string());
                }
                report.failed.push(FailedPaper {
                    id: paper.id.clone(),
                    attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    report.total_duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Batch complete: {} written ({} malformed), {} failed, {} skipped, {}ms",
        report.written(),
        report.malformed,
        report.failed.len(),
        report.skipped,
        report.total_duration_ms
    );
    if let Some(cb) = progress {
        cb.on_batch_complete(&report);
    }
    Ok(report)
}

/// Run one paper, re-running the whole pipeline on transient errors.
///
/// On failure returns the number of attempts made with the last error.
async fn run_with_retry(
    pipeline: &Pipeline,
    paper: &PaperRef,
    index: usize,
    total: usize,
    options: &BatchOptions,
    progress: Option<&ProgressCallback>,
) -> Result<LogEntry, (u32, DigestError)> {
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let backoff = options.backoff_for(attempt);
            warn!(
                "Paper {}: retry {}/{} after {}ms",
                paper.id,
                attempt,
                max_attempts - 1,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        if let Some(cb) = progress {
            cb.on_paper_start(index, total, &paper.id);
        }

        attempt += 1;
        match pipeline.run(paper.clone()).await {
            Ok(entry) => return Ok(entry),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!("Paper {}: attempt {} failed: {}", paper.id, attempt, e);
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DigestConfig;
    use crate::controller::{AnalyzeStage, PipelineState, Stage, StageFuture, StateField, StoreStage};
    use crate::pipeline::analyze::Analyzer;
    use crate::progress::BatchProgressCallback;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns canned text per paper id; ids listed in `fail` get the
    /// matching HTTP status as a fetch error, a fixed number of times.
    struct ScriptedExtract {
        fail: Mutex<HashMap<String, (u16, usize)>>,
        calls: AtomicUsize,
    }

    impl ScriptedExtract {
        fn new(fail: &[(&str, u16, usize)]) -> Self {
            Self {
                fail: Mutex::new(
                    fail.iter()
                        .map(|(id, status, times)| (id.to_string(), (*status, *times)))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Stage for Arc<ScriptedExtract> {
        fn name(&self) -> &'static str {
            "scripted_extract"
        }
        fn provides(&self) -> &'static [StateField] {
            &[StateField::Text]
        }
        fn run(&self, state: PipelineState) -> StageFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let failure = {
                    let mut fail = self.fail.lock().unwrap();
                    match fail.get_mut(&state.paper().id) {
                        Some((status, remaining)) if *remaining > 0 => {
                            *remaining -= 1;
                            Some(*status)
                        }
                        _ => None,
                    }
                };
                if let Some(status) = failure {
                    return Err(DigestError::Fetch {
                        url: state.paper().pdf_url.clone(),
                        status: Some(status),
                        detail: format!("HTTP {status}"),
                    });
                }
                let text = format!("text of {}", state.paper().id);
                Ok(state.with_text(text))
            })
        }
    }

    struct ByText;

    impl Analyzer for ByText {
        fn analyze<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, DigestError>> {
            Box::pin(async move {
                if text.ends_with("garbled") {
                    Ok("I am not JSON".to_string())
                } else {
                    Ok(r#"{"domain":"traditional","formulas":[],"use_cases":[]}"#.to_string())
                }
            })
        }
    }

    fn setup(
        fail: &[(&str, u16, usize)],
    ) -> (tempfile::TempDir, Arc<ResultStore>, Arc<ScriptedExtract>, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("log.jsonl")));
        let extract = Arc::new(ScriptedExtract::new(fail));
        let config = DigestConfig::default();
        let pipeline = Pipeline::builder()
            .entry(extract.clone())
            .then(AnalyzeStage::new(Arc::new(ByText), &config))
            .then(StoreStage::new(store.clone()))
            .build()
            .unwrap();
        (dir, store, extract, pipeline)
    }

    fn papers(ids: &[&str]) -> Vec<PaperRef> {
        ids.iter()
            .map(|id| PaperRef::new(*id, "", format!("http://x/{id}.pdf"), ""))
            .collect()
    }

    fn fast(max_attempts: u32) -> BatchOptions {
        BatchOptions {
            max_attempts,
            retry_backoff_ms: 1,
            throttle_ms: 0,
            skip_processed: true,
            limit: None,
        }
    }

    #[tokio::test]
    async fn failures_do_not_block_other_papers() {
        let (_dir, store, _extract, pipeline) = setup(&[("b", 404, usize::MAX)]);
        let report = process_batch(&pipeline, &store, &papers(&["a", "b", "c"]), &fast(3), None)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "b");
        // 404 is not transient, so no retry
        assert_eq!(report.failed[0].attempts, 1);

        let ids: Vec<String> = store
            .read_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (_dir, store, extract, pipeline) = setup(&[("a", 503, 2)]);
        let report = process_batch(&pipeline, &store, &papers(&["a"]), &fast(3), None)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(extract.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (_dir, store, extract, pipeline) = setup(&[("a", 503, usize::MAX)]);
        let report = process_batch(&pipeline, &store, &papers(&["a"]), &fast(2), None)
            .await
            .unwrap();
        assert_eq!(report.failed[0].attempts, 2);
        assert_eq!(extract.calls.load(Ordering::SeqCst), 2);
        assert!(store.read_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skips_duplicates_and_resumes() {
        let (_dir, store, extract, pipeline) = setup(&[]);
        process_batch(&pipeline, &store, &papers(&["a", "a"]), &fast(1), None)
            .await
            .unwrap();
        let report = process_batch(&pipeline, &store, &papers(&["a", "b"]), &fast(1), None)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(extract.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.read_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_id_is_attempted_again_later_in_batch() {
        let (_dir, store, extract, pipeline) = setup(&[("b", 404, 1)]);
        let report = process_batch(&pipeline, &store, &papers(&["b", "b"]), &fast(1), None)
            .await
            .unwrap();

        assert_eq!(extract.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(store.read_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn limit_caps_attempts() {
        let (_dir, store, _extract, pipeline) = setup(&[]);
        let options = BatchOptions {
            limit: Some(2),
            ..fast(1)
        };
        let report = process_batch(&pipeline, &store, &papers(&["a", "b", "c", "d"]), &options, None)
            .await
            .unwrap();
        assert_eq!(report.written(), 2);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn malformed_analysis_counts_separately() {
        let (_dir, store, _extract, pipeline) = setup(&[]);
        let report = process_batch(&pipeline, &store, &papers(&["ok", "garbled"]), &fast(1), None)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(store.read_entries().await.unwrap().len(), 2);
    }

    #[derive(Default)]
    struct Tracking {
        events: Mutex<Vec<String>>,
    }

    impl BatchProgressCallback for Tracking {
        fn on_batch_start(&self, total: usize) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }
        fn on_paper_complete(&self, _index: usize, _total: usize, entry: &LogEntry) {
            self.events.lock().unwrap().push(format!("done {}", entry.id));
        }
        fn on_paper_error(&self, _index: usize, _total: usize, paper_id: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("error {paper_id}"));
        }
        fn on_paper_skipped(&self, _index: usize, _total: usize, paper_id: &str, _reason: &str) {
            self.events.lock().unwrap().push(format!("skip {paper_id}"));
        }
        fn on_batch_complete(&self, report: &BatchReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("end {}", report.written()));
        }
    }

    #[tokio::test]
    async fn progress_events_in_order() {
        let (_dir, store, _extract, pipeline) = setup(&[("b", 404, 1)]);
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();

        process_batch(&pipeline, &store, &papers(&["a", "b", "a"]), &fast(1), Some(&cb))
            .await
            .unwrap();

        assert_eq!(
            *tracker.events.lock().unwrap(),
            vec!["start 3", "done a", "error b", "skip a", "end 1"]
        );
    }
}
