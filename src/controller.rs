//! Pipeline controller: a fixed, linear stage list and its driver.
//!
//! ```text
//! Start ──▶ ExtractPdf ──▶ Analyze ──▶ Store ──▶ End
//! ```
//!
//! Stages are wired once, at build time, as an ordered list. A run threads
//! one [`PipelineState`] through every stage in order and ends after the
//! last one. There is no branching, no retry and no timeout in here: the
//! first stage error aborts the run and propagates unchanged to the caller.
//!
//! Each stage declares which [`StateField`]s it needs and which it fills.
//! [`PipelineBuilder::build`] rejects wirings that cannot satisfy those
//! declarations, and the driver re-checks them around every stage so a
//! populated field can never silently disappear.

use crate::config::DigestConfig;
use crate::error::DigestError;
use crate::output::{AnalysisRecord, LogEntry};
use crate::paper::PaperRef;
use crate::pipeline::analyze::{Analyzer, LlmAnalyzer};
use crate::pipeline::extract::PdfTextExtractor;
use crate::pipeline::parse::parse_response;
use crate::pipeline::store::ResultStore;
use crate::prompts::char_prefix;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── State ────────────────────────────────────────────────────────────────

/// Fields of [`PipelineState`] that stages populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Text,
    Analysis,
    Entry,
}

impl StateField {
    pub const ALL: [StateField; 3] = [StateField::Text, StateField::Analysis, StateField::Entry];

    pub fn name(self) -> &'static str {
        match self {
            StateField::Text => "text",
            StateField::Analysis => "analysis",
            StateField::Entry => "entry",
        }
    }
}

/// The record threaded through one run.
///
/// Created per paper, consumed by the run. Fields can be set but never
/// cleared.
///
/// A field counts as present once it is set, even when empty: an
/// image-only PDF yields empty `text`, which is logged as a warning and
/// still analysed and stored.
#[derive(Debug, Clone)]
pub struct PipelineState {
    paper: PaperRef,
    text: Option<String>,
    analysis: Option<AnalysisRecord>,
    entry: Option<LogEntry>,
}

impl PipelineState {
    pub fn new(paper: PaperRef) -> Self {
        Self {
            paper,
            text: None,
            analysis: None,
            entry: None,
        }
    }

    pub fn paper(&self) -> &PaperRef {
        &self.paper
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn analysis(&self) -> Option<&AnalysisRecord> {
        self.analysis.as_ref()
    }

    /// The entry the store stage persisted.
    pub fn entry(&self) -> Option<&LogEntry> {
        self.entry.as_ref()
    }

    pub fn with_text(mut self, text: String) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisRecord) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_entry(mut self, entry: LogEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn has(&self, field: StateField) -> bool {
        match field {
            StateField::Text => self.text.is_some(),
            StateField::Analysis => self.analysis.is_some(),
            StateField::Entry => self.entry.is_some(),
        }
    }

    fn populated(&self) -> Vec<StateField> {
        StateField::ALL
            .into_iter()
            .filter(|f| self.has(*f))
            .collect()
    }
}

// ── Stages ───────────────────────────────────────────────────────────────

/// Future returned by [`Stage::run`].
pub type StageFuture<'a> = BoxFuture<'a, Result<PipelineState, DigestError>>;

/// One step of the pipeline.
pub trait Stage: Send + Sync {
    /// Unique name within a pipeline, used for wiring and logs.
    fn name(&self) -> &'static str;

    /// Fields that must be present when this stage starts.
    fn requires(&self) -> &'static [StateField] {
        &[]
    }

    /// Fields this stage guarantees to populate.
    fn provides(&self) -> &'static [StateField] {
        &[]
    }

    fn run(&self, state: PipelineState) -> StageFuture<'_>;
}

/// `ExtractPdf`: download the paper's PDF and extract its text.
pub struct ExtractPdfStage {
    extractor: PdfTextExtractor,
}

impl ExtractPdfStage {
    pub const NAME: &'static str = "extract_pdf";

    pub fn new(extractor: PdfTextExtractor) -> Self {
        Self { extractor }
    }
}

impl Stage for ExtractPdfStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn provides(&self) -> &'static [StateField] {
        &[StateField::Text]
    }

    fn run(&self, state: PipelineState) -> StageFuture<'_> {
        Box::pin(async move {
            let text = self.extractor.extract(&state.paper().pdf_url).await?;
            if text.trim().is_empty() {
                warn!("Paper {}: PDF has no extractable text", state.paper().id);
            }
            Ok(state.with_text(text))
        })
    }
}

/// `Analyze`: send a capped prefix of the text to the analyzer and parse the reply.
pub struct AnalyzeStage {
    analyzer: Arc<dyn Analyzer>,
    prompt_char_cap: usize,
    excerpt_char_cap: usize,
}

impl AnalyzeStage {
    pub const NAME: &'static str = "analyze";

    pub fn new(analyzer: Arc<dyn Analyzer>, config: &DigestConfig) -> Self {
        Self {
            analyzer,
            prompt_char_cap: config.prompt_char_cap,
            excerpt_char_cap: config.excerpt_char_cap,
        }
    }
}

impl Stage for AnalyzeStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [StateField] {
        &[StateField::Text]
    }

    fn provides(&self) -> &'static [StateField] {
        &[StateField::Analysis]
    }

    fn run(&self, state: PipelineState) -> StageFuture<'_> {
        Box::pin(async move {
            let text = state.text().ok_or(DigestError::MissingStateField {
                stage: Self::NAME,
                field: StateField::Text.name(),
            })?;
            let excerpt = char_prefix(text, self.prompt_char_cap);

            let raw = self.analyzer.analyze(excerpt).await?;
            let analysis = parse_response(&raw, self.excerpt_char_cap);
            if !analysis.is_success() {
                warn!("Paper {}: storing malformed analysis", state.paper().id);
            }
            Ok(state.with_analysis(analysis))
        })
    }
}

/// `Store`: append the paper's log entry. The terminal stage.
pub struct StoreStage {
    store: Arc<ResultStore>,
}

impl StoreStage {
    pub const NAME: &'static str = "store";

    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }
}

impl Stage for StoreStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [StateField] {
        &[StateField::Text, StateField::Analysis]
    }

    fn provides(&self) -> &'static [StateField] {
        &[StateField::Entry]
    }

    fn run(&self, state: PipelineState) -> StageFuture<'_> {
        Box::pin(async move {
            let analysis = state
                .analysis()
                .cloned()
                .ok_or(DigestError::MissingStateField {
                    stage: Self::NAME,
                    field: StateField::Analysis.name(),
                })?;
            let entry = LogEntry::new(state.paper(), analysis);
            self.store.append(&entry).await?;
            Ok(state.with_entry(entry))
        })
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// A compiled, immutable stage list.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    /// The standard `ExtractPdf → Analyze → Store` wiring, not yet built.
    ///
    /// Use this to splice extra stages in before building.
    pub fn standard_builder(
        config: &DigestConfig,
        analyzer: Arc<dyn Analyzer>,
        store: Arc<ResultStore>,
    ) -> Result<PipelineBuilder, DigestError> {
        let extractor = PdfTextExtractor::with_timeout(config.download_timeout_secs)?;
        Ok(Pipeline::builder()
            .entry(ExtractPdfStage::new(extractor))
            .then(AnalyzeStage::new(analyzer, config))
            .then(StoreStage::new(store)))
    }

    /// The standard pipeline around a caller-supplied analyzer and store.
    pub fn standard(
        config: &DigestConfig,
        analyzer: Arc<dyn Analyzer>,
        store: Arc<ResultStore>,
    ) -> Result<Self, DigestError> {
        Self::standard_builder(config, analyzer, store)?.build()
    }

    /// The standard pipeline with the LLM provider and log path from `config`.
    ///
    /// Provider resolution happens here, so a missing credential fails
    /// before any paper is processed.
    pub fn from_config(config: &DigestConfig) -> Result<Self, DigestError> {
        let analyzer: Arc<dyn Analyzer> = Arc::new(LlmAnalyzer::from_config(config)?);
        let store = Arc::new(ResultStore::new(config.output_path.clone()));
        Self::standard(config, analyzer, store)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Process one paper through every stage and return the persisted entry.
    ///
    /// # Errors
    /// The first stage error, unchanged. Nothing is persisted unless the
    /// store stage itself completed.
    pub async fn run(&self, paper: PaperRef) -> Result<LogEntry, DigestError> {
        let start = Instant::now();
        let original = paper.clone();
        info!("Processing paper {}", paper.id);

        let mut state = PipelineState::new(paper);

        for stage in &self.stages {
            let name = stage.name();
            for field in stage.requires() {
                if !state.has(*field) {
                    return Err(DigestError::MissingStateField {
                        stage: name,
                        field: field.name(),
                    });
                }
            }

            let before = state.populated();
            let stage_start = Instant::now();
            state = stage.run(state).await?;
            debug!(
                "Paper {}: stage {} done in {:?}",
                original.id,
                name,
                stage_start.elapsed()
            );

            if let Some(field) = before
                .into_iter()
                .chain(stage.provides().iter().copied())
                .find(|f| !state.has(*f))
            {
                return Err(DigestError::MissingStateField {
                    stage: name,
                    field: field.name(),
                });
            }
            if state.paper() != &original {
                return Err(DigestError::Internal(format!(
                    "Stage '{name}' replaced the paper reference"
                )));
            }
        }

        let entry = state.entry.ok_or(DigestError::MissingStateField {
            stage: "end",
            field: StateField::Entry.name(),
        })?;

        info!(
            "Paper {} done in {}ms ({})",
            entry.id,
            start.elapsed().as_millis(),
            if entry.analysis.is_success() {
                "analysis ok"
            } else {
                "malformed analysis"
            }
        );
        Ok(entry)
    }

    /// Synchronous wrapper around [`Pipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn run_sync(&self, paper: PaperRef) -> Result<LogEntry, DigestError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| DigestError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.run(paper))
    }
}

/// Process a single paper with a pipeline built from `config`.
pub async fn process_paper(
    paper: PaperRef,
    config: &DigestConfig,
) -> Result<LogEntry, DigestError> {
    Pipeline::from_config(config)?.run(paper).await
}

/// Wires stages in order. `entry` starts the list, `then` appends.
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    /// Set the first stage, discarding anything wired so far.
    pub fn entry(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.clear();
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a stage after the current last one.
    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Splice `stage` in directly after the stage named `after`.
    pub fn insert_after(
        mut self,
        after: &str,
        stage: impl Stage + 'static,
    ) -> Result<Self, DigestError> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.name() == after)
            .ok_or_else(|| DigestError::InvalidConfig(format!("No stage named '{after}'")))?;
        self.stages.insert(idx + 1, Box::new(stage));
        Ok(self)
    }

    /// Validate the wiring and freeze it.
    ///
    /// Rejects an empty list, duplicate names, a stage whose required fields
    /// no earlier stage provides, and a last stage that does not produce the
    /// log entry.
    pub fn build(self) -> Result<Pipeline, DigestError> {
        let last = self
            .stages
            .last()
            .ok_or_else(|| DigestError::InvalidConfig("Pipeline has no stages".into()))?;
        if !last.provides().contains(&StateField::Entry) {
            return Err(DigestError::InvalidConfig(format!(
                "Terminal stage '{}' does not produce a log entry",
                last.name()
            )));
        }

        let mut seen_names: Vec<&'static str> = Vec::with_capacity(self.stages.len());
        let mut available: Vec<StateField> = Vec::new();
        for stage in &self.stages {
            if seen_names.contains(&stage.name()) {
                return Err(DigestError::InvalidConfig(format!(
                    "Duplicate stage name '{}'",
                    stage.name()
                )));
            }
            seen_names.push(stage.name());

            if let Some(missing) = stage.requires().iter().find(|f| !available.contains(f)) {
                return Err(DigestError::InvalidConfig(format!(
                    "Stage '{}' requires '{}' but no earlier stage provides it",
                    stage.name(),
                    missing.name()
                )));
            }
            available.extend_from_slice(stage.provides());
        }

        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct FixedText(&'static str);

    impl Stage for FixedText {
        fn name(&self) -> &'static str {
            "fixed_text"
        }
        fn provides(&self) -> &'static [StateField] {
            &[StateField::Text]
        }
        fn run(&self, state: PipelineState) -> StageFuture<'_> {
            Box::pin(async move { Ok(state.with_text(self.0.to_string())) })
        }
    }

    struct Recording {
        reply: String,
        seen: Mutex<Vec<String>>,
    }

    impl Analyzer for Recording {
        fn analyze<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, DigestError>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(text.to_string());
                Ok(self.reply.clone())
            })
        }
    }

    /// Drops everything but the paper.
    struct Amnesiac;

    impl Stage for Amnesiac {
        fn name(&self) -> &'static str {
            "amnesiac"
        }
        fn run(&self, state: PipelineState) -> StageFuture<'_> {
            Box::pin(async move { Ok(PipelineState::new(state.paper().clone())) })
        }
    }

    fn paper() -> PaperRef {
        PaperRef::new("42", "Vol Models", "http://x/doc.pdf", "http://x/abs")
    }

    fn recording(reply: &str) -> Arc<Recording> {
        Arc::new(Recording {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn store_in(dir: &tempfile::TempDir) -> Arc<ResultStore> {
        Arc::new(ResultStore::new(dir.path().join("log.jsonl")))
    }

    #[test]
    fn state_fields_only_grow() {
        let state = PipelineState::new(paper());
        assert!(state.populated().is_empty());
        let state = state.with_text("t".into());
        assert!(state.has(StateField::Text));
        let state = state.with_analysis(AnalysisRecord::Success(Default::default()));
        assert_eq!(state.populated(), vec![StateField::Text, StateField::Analysis]);
    }

    #[test]
    fn build_rejects_empty() {
        assert!(Pipeline::builder().build().is_err());
    }

    #[test]
    fn build_rejects_unsatisfied_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let err = Pipeline::builder()
            .entry(StoreStage::new(store_in(&dir)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requires 'text'"), "got: {err}");
    }

    #[test]
    fn build_rejects_non_terminal_last_stage() {
        let err = Pipeline::builder()
            .entry(FixedText("x"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("log entry"), "got: {err}");
    }

    #[test]
    fn standard_wiring_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::standard(
            &DigestConfig::default(),
            recording("{}"),
            store_in(&dir),
        )
        .unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![ExtractPdfStage::NAME, AnalyzeStage::NAME, StoreStage::NAME]
        );
    }

    #[test]
    fn insert_after_unknown_stage_fails() {
        let result = Pipeline::builder()
            .entry(FixedText("x"))
            .insert_after("nope", Amnesiac);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn analyze_receives_capped_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = recording(r#"{"domain":"crypto"}"#);
        let config = DigestConfig::builder().prompt_char_cap(10).build().unwrap();

        let pipeline = Pipeline::builder()
            .entry(FixedText("0123456789abcdef"))
            .then(AnalyzeStage::new(analyzer.clone(), &config))
            .then(StoreStage::new(store_in(&dir)))
            .build()
            .unwrap();

        let entry = pipeline.run(paper()).await.unwrap();
        assert_eq!(*analyzer.seen.lock().unwrap(), vec!["0123456789".to_string()]);
        assert_eq!(serde_json::to_value(&entry.analysis).unwrap(), json!({"domain": "crypto"}));
    }

    #[tokio::test]
    async fn regression_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = DigestConfig::default();
        let pipeline = Pipeline::builder()
            .entry(FixedText("text"))
            .then(AnalyzeStage::new(recording("{}"), &config))
            .then(StoreStage::new(store_in(&dir)))
            .insert_after("analyze", Amnesiac)
            .unwrap()
            .build()
            .unwrap();

        let err = pipeline.run(paper()).await.unwrap_err();
        match err {
            DigestError::MissingStateField { stage, field } => {
                assert_eq!(stage, "amnesiac");
                assert_eq!(field, "text");
            }
            other => panic!("unexpected error: {other}"),
        }
        let log: Vec<Value> = std::fs::read_to_string(dir.path().join("log.jsonl"))
            .map(|raw| raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect())
            .unwrap_or_default();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn empty_text_still_reaches_store() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = recording("not json");
        let pipeline = Pipeline::builder()
            .entry(FixedText(""))
            .then(AnalyzeStage::new(analyzer.clone(), &DigestConfig::default()))
            .then(StoreStage::new(store_in(&dir)))
            .build()
            .unwrap();

        let entry = pipeline.run(paper()).await.unwrap();
        assert_eq!(*analyzer.seen.lock().unwrap(), vec![String::new()]);
        assert_eq!(entry.id, "42");
        assert!(dir.path().join("log.jsonl").exists());
    }

    #[test]
    fn run_sync_outside_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let config = DigestConfig::default();
        let pipeline = Pipeline::builder()
            .entry(FixedText("text"))
            .then(AnalyzeStage::new(recording("not json"), &config))
            .then(StoreStage::new(store_in(&dir)))
            .build()
            .unwrap();

        let entry = pipeline.run_sync(paper()).unwrap();
        assert!(!entry.analysis.is_success());
    }
}
