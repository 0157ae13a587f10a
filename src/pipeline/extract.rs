//! Text extraction: PDF bytes → one plain-text string.
//!
//! Pages are read in document order with `lopdf` and joined with a single
//! space, so page boundaries are not preserved. There is no OCR: a page that
//! only holds images contributes an empty string.
//!
//! Parsing is CPU-bound and runs under `spawn_blocking` to keep the Tokio
//! worker threads free.

use crate::error::DigestError;
use crate::pipeline::fetch;
use lopdf::Document;
use tracing::{debug, info, warn};

/// Separator placed between consecutive pages.
pub const PAGE_SEPARATOR: &str = " ";

/// Fetches a PDF by URL and converts it to plain text.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    client: reqwest::Client,
}

impl PdfTextExtractor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build an extractor whose HTTP client enforces `timeout_secs`.
    pub fn with_timeout(timeout_secs: Option<u64>) -> Result<Self, DigestError> {
        Ok(Self::new(fetch::build_client(timeout_secs)?))
    }

    /// Download `url` and return the text of every page, space-joined.
    pub async fn extract(&self, url: &str) -> Result<String, DigestError> {
        let bytes = fetch::fetch_pdf(&self.client, url).await?;
        extract_text(url, bytes).await
    }
}

/// Extract the text of an in-memory PDF.
///
/// `url` is only used to label errors.
pub async fn extract_text(url: &str, bytes: Vec<u8>) -> Result<String, DigestError> {
    let label = url.to_string();
    let pages = tokio::task::spawn_blocking(move || extract_pages(&label, &bytes))
        .await
        .map_err(|e| DigestError::Internal(format!("Extraction task panicked: {e}")))??;

    let text = join_pages(&pages);
    info!(
        "Extracted {} chars from {} pages of {}",
        text.chars().count(),
        pages.len(),
        url
    );
    Ok(text)
}

/// Blocking implementation: per-page text in document order.
pub fn extract_pages(url: &str, bytes: &[u8]) -> Result<Vec<String>, DigestError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(DigestError::NotAPdf {
            url: url.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }

    let document = Document::load_mem(bytes).map_err(|e| DigestError::CorruptPdf {
        url: url.to_string(),
        detail: e.to_string(),
    })?;

    // get_pages() is keyed by 1-based page number, so iteration is in document order.
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    debug!("PDF loaded: {} pages", page_numbers.len());

    let pages = page_numbers
        .into_iter()
        .map(|page_num| match document.extract_text(&[page_num]) {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => {
                warn!("Page {}: no extractable text ({})", page_num, e);
                String::new()
            }
        })
        .collect();

    Ok(pages)
}

/// Join per-page text with [`PAGE_SEPARATOR`].
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}
