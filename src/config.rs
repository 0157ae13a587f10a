//! Configuration types for paper digestion.
//!
//! Every knob a run needs lives in [`DigestConfig`], built via its
//! [`DigestConfigBuilder`]. Batch-level policy (retries, throttling, resume)
//! lives separately in [`BatchOptions`] because the pipeline itself never
//! retries; only the caller driving it does.

use crate::error::DigestError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default output log path, one JSON object per line.
pub const DEFAULT_OUTPUT_PATH: &str = "arxiv_analysis.jsonl";

/// Configuration for processing papers through the digest pipeline.
///
/// Built via [`DigestConfig::builder()`] or using [`DigestConfig::default()`].
///
/// # Example
/// ```rust
/// use qfin_digest::DigestConfig;
///
/// let config = DigestConfig::builder()
///     .prompt_char_cap(6000)
///     .model("gemini-2.5-flash")
///     .output_path("out/analysis.jsonl")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DigestConfig {
    /// Number of leading characters of the paper text embedded in the prompt. Default: 4000.
    ///
    /// Formulas that only appear later in a paper are missed. Raising the cap
    /// costs input tokens on every call.
    pub prompt_char_cap: usize,

    /// Maximum characters of raw model output kept in a malformed record. Default: 500.
    pub excerpt_char_cap: usize,

    /// Maximum characters of the raw response echoed to the debug log. Default: 300.
    pub preview_char_cap: usize,

    /// HTTP client deadline for the PDF download, in seconds. Default: 120.
    ///
    /// The pipeline itself defines no timeout; this is the client's own.
    /// `None` disables it.
    pub download_timeout_secs: Option<u64>,

    /// LLM model identifier, e.g. "gemini-2.5-pro", "gpt-4.1-mini".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the analysis call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per paper. Default: 2048.
    pub max_tokens: usize,

    /// Custom prompt template. Must contain `{paper_text}`. If None, uses built-in default.
    pub prompt_template: Option<String>,

    /// Append-only output log. Default: [`DEFAULT_OUTPUT_PATH`].
    pub output_path: PathBuf,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            prompt_char_cap: 4000,
            excerpt_char_cap: 500,
            preview_char_cap: 300,
            download_timeout_secs: Some(120),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            prompt_template: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl fmt::Debug for DigestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestConfig")
            .field("prompt_char_cap", &self.prompt_char_cap)
            .field("excerpt_char_cap", &self.excerpt_char_cap)
            .field("preview_char_cap", &self.preview_char_cap)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("prompt_template", &self.prompt_template.as_ref().map(|t| t.len()))
            .field("output_path", &self.output_path)
            .finish()
    }
}

impl DigestConfig {
    /// Create a new builder for `DigestConfig`.
    pub fn builder() -> DigestConfigBuilder {
        DigestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DigestConfig`].
#[derive(Debug)]
pub struct DigestConfigBuilder {
    config: DigestConfig,
}

impl DigestConfigBuilder {
    pub fn prompt_char_cap(mut self, chars: usize) -> Self {
        self.config.prompt_char_cap = chars;
        self
    }

    pub fn excerpt_char_cap(mut self, chars: usize) -> Self {
        self.config.excerpt_char_cap = chars;
        self
    }

    pub fn preview_char_cap(mut self, chars: usize) -> Self {
        self.config.preview_char_cap = chars;
        self
    }

    pub fn download_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DigestConfig, DigestError> {
        let c = &self.config;
        if c.prompt_char_cap == 0 {
            return Err(DigestError::InvalidConfig(
                "Prompt character cap must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DigestError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains(crate::prompts::PAPER_TEXT_PLACEHOLDER) {
                return Err(DigestError::InvalidConfig(format!(
                    "Prompt template must contain {}",
                    crate::prompts::PAPER_TEXT_PLACEHOLDER
                )));
            }
        }
        if c.output_path.as_os_str().is_empty() {
            return Err(DigestError::InvalidConfig("Output path is empty".into()));
        }
        Ok(self.config)
    }
}

/// Policy for driving many papers through the pipeline.
///
/// Used by [`crate::batch::process_batch`]; the pipeline itself ignores it.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Total attempts per paper, counting the first. Default: 1 (no retry).
    ///
    /// Only transient failures (see [`DigestError::is_transient`]) are retried;
    /// each retry re-runs the whole paper from the fetch stage.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Pause between papers in milliseconds. Default: 1000.
    pub throttle_ms: u64,

    /// Skip papers whose id already appears in the output log. Default: true.
    pub skip_processed: bool,

    /// Process at most this many papers. Default: no limit.
    pub limit: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff_ms: 1000,
            throttle_ms: 1000,
            skip_processed: true,
            limit: None,
        }
    }
}

impl BatchOptions {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> u64 {
        self.retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_caps() {
        let c = DigestConfig::default();
        assert_eq!(c.prompt_char_cap, 4000);
        assert_eq!(c.excerpt_char_cap, 500);
        assert_eq!(c.preview_char_cap, 300);
        assert_eq!(c.output_path, PathBuf::from("arxiv_analysis.jsonl"));
    }

    #[test]
    fn builder_rejects_zero_prompt_cap() {
        let err = DigestConfig::builder().prompt_char_cap(0).build().unwrap_err();
        assert!(err.to_string().contains("Prompt character cap"));
    }

    #[test]
    fn builder_rejects_template_without_placeholder() {
        let err = DigestConfig::builder()
            .prompt_template("Analyse this paper.")
            .build()
            .unwrap_err();
        assert!(matches!(err, DigestError::InvalidConfig(_)));
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = DigestConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn debug_hides_provider() {
        let c = DigestConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("prompt_char_cap"));
    }

    #[test]
    fn backoff_doubles() {
        let opts = BatchOptions {
            retry_backoff_ms: 500,
            ..Default::default()
        };
        assert_eq!(opts.backoff_for(1), 500);
        assert_eq!(opts.backoff_for(2), 1000);
        assert_eq!(opts.backoff_for(3), 2000);
    }
}
