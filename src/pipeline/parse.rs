//! Response parsing: raw model output → [`AnalysisRecord`].
//!
//! Models routinely wrap JSON in a markdown fence even when told not to, and
//! sometimes answer in prose. [`parse_response`] strips an outer fence,
//! tries JSON, and on failure records a bounded excerpt of the raw output.
//! It never fails: malformed output is data, not an error.

use crate::output::{AnalysisRecord, INVALID_JSON, NOT_AN_OBJECT};
use crate::prompts::char_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)\s*```$").unwrap());

/// Remove a leading/trailing markdown code fence and surrounding whitespace.
///
/// Both a generic ```` ``` ```` fence and a ```` ```json ```` fence are
/// recognised. An opening fence whose closing fence was cut off is dropped
/// on its own.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(caps) = RE_OUTER_FENCE.captures(trimmed) {
        return caps.get(1).map_or("", |m| m.as_str().trim());
    }

    // Unterminated fence: drop the opening line.
    if let Some(rest) = trimmed.strip_prefix("```") {
        return match rest.find('\n') {
            Some(newline) => rest[newline + 1..].trim(),
            None => rest.trim_start_matches("json").trim_start_matches("JSON").trim(),
        };
    }

    trimmed
}

/// Turn raw model output into an [`AnalysisRecord`].
///
/// `excerpt_char_cap` bounds the raw text kept in a malformed record.
pub fn parse_response(raw: &str, excerpt_char_cap: usize) -> AnalysisRecord {
    let body = strip_code_fence(raw);

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => AnalysisRecord::Success(map),
        Ok(other) => {
            warn!("Model response is JSON but not an object ({})", json_kind(&other));
            malformed(NOT_AN_OBJECT, raw, excerpt_char_cap)
        }
        Err(e) => {
            warn!("Model response is not valid JSON: {}", e);
            malformed(INVALID_JSON, raw, excerpt_char_cap)
        }
    }
}

fn malformed(label: &str, raw: &str, cap: usize) -> AnalysisRecord {
    AnalysisRecord::Malformed {
        error: label.to_string(),
        raw_response: char_prefix(raw, cap).to_string(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
