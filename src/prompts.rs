//! Prompt for the structured financial analysis call.
//!
//! The template is the only place the expected JSON shape (`domain`,
//! `formulas`, `use_cases`) is described to the model. Nothing downstream
//! validates that shape, so changes here change what ends up in the log.
//!
//! Callers can override the template via
//! [`crate::config::DigestConfig::prompt_template`].

/// Placeholder replaced with the (capped) paper text.
pub const PAPER_TEXT_PLACEHOLDER: &str = "{paper_text}";

/// Default analysis prompt, used when `DigestConfig::prompt_template` is `None`.
pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"You're an expert quant researcher.

Given the following paper text, identify:

1. The domain of finance (traditional, crypto, derivatives, etc.)
2. Up to 5 key formulas, in LaTeX if possible.
3. A short use case or scenario for each formula.

Respond in JSON with keys: domain, formulas, use_cases.
- "domain": a short string
- "formulas": an array of at most 5 strings
- "use_cases": an array of strings, one per formula, in the same order

Paper text:
"""
{paper_text}
""""#;

/// Render the analysis prompt with `paper_text` embedded.
///
/// The text is embedded as given; capping happens before this call.
pub fn render_analysis_prompt(template: Option<&str>, paper_text: &str) -> String {
    template
        .unwrap_or(DEFAULT_ANALYSIS_PROMPT)
        .replace(PAPER_TEXT_PLACEHOLDER, paper_text)
}

/// Return the first `cap` characters of `text`.
///
/// Counts Unicode scalar values, not bytes, so the cut never splits a
/// character.
pub fn char_prefix(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
