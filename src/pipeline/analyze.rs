//! LLM interaction: send the analysis prompt and return the raw response.
//!
//! [`Analyzer`] is the seam between the pipeline and the model provider. The
//! pipeline only ever sees `analyze(text) -> String`; prompt wording lives in
//! [`crate::prompts`] and provider selection in [`resolve_provider`].
//!
//! No retries happen here. A failed call is logged and surfaced as
//! [`DigestError::AnalysisService`].

use crate::config::DigestConfig;
use crate::error::DigestError;
use crate::prompts::{char_prefix, render_analysis_prompt};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Default model when Gemini is picked from `GEMINI_API_KEY`.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Produces raw model output for a paper's text.
///
/// The text passed in is already capped by the caller.
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, DigestError>>;
}

/// [`Analyzer`] backed by an `edgequake_llm` chat provider.
pub struct LlmAnalyzer {
    provider: Arc<dyn LLMProvider>,
    prompt_template: Option<String>,
    options: CompletionOptions,
    preview_char_cap: usize,
}

impl LlmAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DigestConfig) -> Self {
        Self {
            provider,
            prompt_template: config.prompt_template.clone(),
            options: build_options(config),
            preview_char_cap: config.preview_char_cap,
        }
    }

    /// Resolve the provider from `config` and wrap it.
    ///
    /// Fails with [`DigestError::ProviderNotConfigured`] when no credential
    /// is available, before any paper is touched.
    pub fn from_config(config: &DigestConfig) -> Result<Self, DigestError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

impl Analyzer for LlmAnalyzer {
    fn analyze<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, DigestError>> {
        Box::pin(async move {
            let prompt = render_analysis_prompt(self.prompt_template.as_deref(), text);
            let messages = vec![ChatMessage::user(prompt)];

            info!("Sending analysis prompt ({} chars of paper text)", text.chars().count());
            let start = Instant::now();

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    info!(
                        "LLM response received: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    debug!(
                        "Raw response preview: {}",
                        char_prefix(&response.content, self.preview_char_cap)
                    );
                    Ok(response.content)
                }
                Err(e) => {
                    error!("LLM analysis call failed after {:?}: {}", start.elapsed(), e);
                    Err(DigestError::AnalysisService {
                        detail: e.to_string(),
                    })
                }
            }
        })
    }
}

/// Build `CompletionOptions` from the digest config.
fn build_options(config: &DigestConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DigestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DigestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Model used when a provider is named without one.
///
/// `None` for providers whose model choice is local (ollama, lmstudio, …).
pub fn default_model_for(provider_name: &str) -> Option<&'static str> {
    match provider_name.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Some(DEFAULT_GEMINI_MODEL),
        "openai" => Some("gpt-4.1-nano"),
        "anthropic" => Some("claude-sonnet-4-20250514"),
        _ => None,
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment. Without `config.model` the
///    provider's own default from [`default_model_for`] is used.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`GEMINI_API_KEY`** with `config.model` or [`DEFAULT_GEMINI_MODEL`].
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &DigestConfig) -> Result<Arc<dyn LLMProvider>, DigestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = match config.model.as_deref() {
            Some(model) => model,
            None => default_model_for(name).ok_or_else(|| {
                DigestError::InvalidConfig(format!(
                    "No default model for provider '{name}'; set a model explicitly (--model)"
                ))
            })?,
        };
        return create_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
        non_empty_env("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&prov, &model);
    }

    if non_empty_env("GEMINI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return create_provider("gemini", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DigestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
