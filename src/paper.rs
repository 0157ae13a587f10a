//! Paper references and the index file that lists them.
//!
//! A [`PaperRef`] is handed to the pipeline by whatever discovered the paper
//! (a crawler, a vector search, a human). The pipeline treats it as
//! read-only.

use crate::error::DigestError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// One document to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRef {
    /// Unique identifier, e.g. an arXiv id such as `2401.01234`.
    pub id: String,
    /// Human-readable title. Crawled indexes may not carry one.
    #[serde(default)]
    pub title: String,
    /// Direct PDF download URL.
    pub pdf_url: String,
    /// Abstract / landing-page URL.
    #[serde(default)]
    pub abs_url: String,
}

impl PaperRef {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        pdf_url: impl Into<String>,
        abs_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            pdf_url: pdf_url.into(),
            abs_url: abs_url.into(),
        }
    }
}

/// Index entry as written by the crawler: `pdf_url` may be null.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    abs_url: Option<String>,
}

/// Load a JSON array of papers from `path`.
///
/// Entries without a PDF URL cannot be processed and are dropped with a
/// warning. Any other field may be missing.
pub fn load_index(path: impl AsRef<Path>) -> Result<Vec<PaperRef>, DigestError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| DigestError::IndexLoad {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let papers = parse_index(&raw).map_err(|detail| DigestError::IndexLoad {
        path: path.to_path_buf(),
        detail,
    })?;
    info!("Loaded {} papers from {}", papers.len(), path.display());
    Ok(papers)
}

fn parse_index(raw: &str) -> Result<Vec<PaperRef>, String> {
    let entries: Vec<IndexEntry> = serde_json::from_str(raw).map_err(|e| e.to_string())?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry.pdf_url {
            Some(pdf_url) if !pdf_url.trim().is_empty() => Some(PaperRef {
                id: entry.id,
                title: entry.title.unwrap_or_default(),
                pdf_url,
                abs_url: entry.abs_url.unwrap_or_default(),
            }),
            _ => {
                warn!("Skipping paper {}: no PDF URL", entry.id);
                None
            }
        })
        .collect())
}
