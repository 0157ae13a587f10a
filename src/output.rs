//! Output types: the analysis record and the persisted log entry.

use crate::paper::PaperRef;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Label for a response that is not valid JSON.
pub const INVALID_JSON: &str = "Invalid JSON";

/// Label for a response that is valid JSON but not an object.
pub const NOT_AN_OBJECT: &str = "Could not parse response";

/// Result of the analysis stage.
///
/// Serialised untagged: a success record is written as the model's own JSON
/// object, a malformed one as `{"error": ..., "raw_response": ...}`.
///
/// Reading back, an object is malformed only when its keys are exactly
/// `error` and `raw_response`, both strings. Any other object is a success,
/// even if it happens to carry those keys among others.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisRecord {
    /// The model's response did not parse as a JSON object.
    Malformed {
        error: String,
        /// Bounded excerpt of the raw model output.
        raw_response: String,
    },
    /// The parsed JSON object, unvalidated.
    Success(Map<String, Value>),
}

impl<'de> Deserialize<'de> for AnalysisRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        if map.len() == 2 {
            if let (Some(Value::String(error)), Some(Value::String(raw_response))) =
                (map.get("error"), map.get("raw_response"))
            {
                return Ok(AnalysisRecord::Malformed {
                    error: error.clone(),
                    raw_response: raw_response.clone(),
                });
            }
        }
        Ok(AnalysisRecord::Success(map))
    }
}

impl AnalysisRecord {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisRecord::Success(_))
    }

    /// Best-effort typed view of a success record.
    ///
    /// `None` for malformed records and for objects that do not follow the
    /// requested `domain` / `formulas` / `use_cases` shape.
    pub fn typed(&self) -> Option<FinancialAnalysis> {
        match self {
            AnalysisRecord::Success(map) => {
                serde_json::from_value(Value::Object(map.clone())).ok()
            }
            AnalysisRecord::Malformed { .. } => None,
        }
    }
}

/// The shape the analysis prompt asks the model for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialAnalysis {
    pub domain: String,
    #[serde(default)]
    pub formulas: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
}

/// Source links persisted with each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUrls {
    pub abs: String,
    pub pdf: String,
}

/// One line of the output log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub title: String,
    pub analysis: AnalysisRecord,
    pub source_urls: SourceUrls,
}

impl LogEntry {
    pub fn new(paper: &PaperRef, analysis: AnalysisRecord) -> Self {
        Self {
            id: paper.id.clone(),
            title: paper.title.clone(),
            analysis,
            source_urls: SourceUrls {
                abs: paper.abs_url.clone(),
                pdf: paper.pdf_url.clone(),
            },
        }
    }
}
