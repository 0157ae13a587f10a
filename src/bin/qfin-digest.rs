//! CLI binary for qfin-digest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DigestConfig` / `BatchOptions`, runs the batch and prints a summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use qfin_digest::{
    load_index, process_batch, Analyzer, BatchOptions, BatchProgressCallback, BatchReport,
    DigestConfig, LlmAnalyzer, LogEntry, PaperRef, Pipeline, ProgressCallback, ResultStore,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch plus a log line per paper.
struct CliProgressCallback {
    bar: ProgressBar,
    attempts: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} papers  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Digesting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            attempts: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_paper_start(&self, _index: usize, _total: usize, paper_id: &str) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(paper_id.to_string());
    }

    fn on_paper_complete(&self, index: usize, total: usize, entry: &LogEntry) {
        let (mark, note) = match entry.analysis.typed() {
            Some(analysis) => (
                green("✓"),
                format!("{} · {} formulas", analysis.domain, analysis.formulas.len()),
            ),
            None => (yellow("⚠"), "malformed analysis".to_string()),
        };
        self.bar.println(format!(
            "  {} {:>4}/{:<4} {:<14} {}",
            mark,
            index + 1,
            total,
            entry.id,
            dim(&note)
        ));
        self.bar.inc(1);
    }

    fn on_paper_error(&self, index: usize, total: usize, paper_id: &str, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>4}/{:<4} {:<14} {}",
            red("✗"),
            index + 1,
            total,
            paper_id,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_paper_skipped(&self, _index: usize, _total: usize, _paper_id: &str, _reason: &str) {
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _report: &BatchReport) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every paper in an index, appending to arxiv_analysis.jsonl
  qfin-digest papers.json

  # First 10 papers, custom log, retry transient failures twice
  qfin-digest papers.json -o digest.jsonl --limit 10 --max-attempts 3

  # One paper without an index file
  qfin-digest --id 2401.00001 --pdf-url https://arxiv.org/pdf/2401.00001

  # Use a specific provider and model
  qfin-digest papers.json --provider openai --model gpt-4.1-mini

INDEX FORMAT:
  A JSON array of objects with "id" and "pdf_url" (required) and
  optional "title" and "abs_url". Entries without a PDF URL are skipped.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override log filter (e.g. qfin_digest=debug)
"#;

/// Extract formulas and use cases from quantitative-finance papers.
#[derive(Parser, Debug)]
#[command(
    name = "qfin-digest",
    version,
    about = "Extract formulas and use cases from quantitative-finance papers with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON index of papers to process.
    #[arg(required_unless_present = "pdf_url", conflicts_with = "pdf_url")]
    index: Option<PathBuf>,

    /// Paper id (single-paper mode).
    #[arg(long, requires = "pdf_url")]
    id: Option<String>,

    /// PDF URL (single-paper mode).
    #[arg(long, requires = "id")]
    pdf_url: Option<String>,

    /// Abstract page URL (single-paper mode).
    #[arg(long, default_value = "", requires = "pdf_url")]
    abs_url: String,

    /// Paper title (single-paper mode).
    #[arg(long, default_value = "", requires = "pdf_url")]
    title: String,

    /// JSON Lines log to append to.
    #[arg(short, long, env = "QFIN_DIGEST_OUTPUT", default_value = qfin_digest::config::DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Process at most this many papers.
    #[arg(long)]
    limit: Option<usize>,

    /// Attempts per paper; only network and LLM failures are retried.
    #[arg(long, env = "QFIN_DIGEST_MAX_ATTEMPTS", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Initial retry delay in milliseconds (doubles per retry).
    #[arg(long, default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Pause between papers in milliseconds.
    #[arg(long, env = "QFIN_DIGEST_THROTTLE_MS", default_value_t = 1000)]
    throttle_ms: u64,

    /// Re-process papers already present in the output log.
    #[arg(long)]
    no_resume: bool,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Text file with a custom prompt; must contain {paper_text}.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Characters of paper text sent to the model.
    #[arg(long, default_value_t = 4000)]
    prompt_cap: usize,

    /// Characters of a malformed reply kept in the log.
    #[arg(long, default_value_t = 500)]
    excerpt_cap: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, default_value_t = 2048)]
    max_tokens: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "QFIN_DIGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let papers = match (&cli.index, &cli.id, &cli.pdf_url) {
        (Some(index), _, _) => load_index(index)
            .with_context(|| format!("Failed to load paper index {}", index.display()))?,
        (None, Some(id), Some(pdf_url)) => vec![PaperRef::new(
            id.clone(),
            cli.title.clone(),
            pdf_url.clone(),
            cli.abs_url.clone(),
        )],
        _ => bail!("Give an index file or both --id and --pdf-url"),
    };

    let config = build_config(&cli).await?;
    let store = Arc::new(ResultStore::new(config.output_path.clone()));
    let analyzer: Arc<dyn Analyzer> =
        Arc::new(LlmAnalyzer::from_config(&config).context("No usable LLM provider")?);
    let pipeline = Pipeline::standard(&config, analyzer, store.clone())
        .context("Failed to build pipeline")?;

    let options = BatchOptions {
        max_attempts: cli.max_attempts,
        retry_backoff_ms: cli.retry_backoff_ms,
        throttle_ms: cli.throttle_ms,
        skip_processed: !cli.no_resume,
        limit: cli.limit,
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let report = process_batch(&pipeline, &store, &papers, &options, progress.as_ref())
        .await
        .context("Batch failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} written ({} malformed)  {} failed  {} skipped  {}ms  →  {}",
            if report.failed.is_empty() {
                green("✔")
            } else {
                yellow("⚠")
            },
            bold(&report.written().to_string()),
            report.malformed,
            report.failed.len(),
            report.skipped,
            report.total_duration_ms,
            bold(&store.path().display().to_string()),
        );
        for failed in &report.failed {
            eprintln!("   {} {}: {}", red("✗"), failed.id, dim(&failed.error));
        }
    }

    if report.written() == 0 && !report.failed.is_empty() {
        bail!("No paper was processed successfully");
    }
    Ok(())
}

/// Map CLI args to `DigestConfig`.
async fn build_config(cli: &Cli) -> Result<DigestConfig> {
    let mut builder = DigestConfig::builder()
        .prompt_char_cap(cli.prompt_cap)
        .excerpt_char_cap(cli.excerpt_cap)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .download_timeout_secs(Some(cli.download_timeout))
        .output_path(cli.output.clone());

    if let Some(ref path) = cli.prompt_file {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }

    builder.build().context("Invalid configuration")
}
