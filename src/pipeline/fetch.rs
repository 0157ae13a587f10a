//! PDF download: plain HTTP(S) GET of the paper's PDF URL.
//!
//! No retries happen here. A non-success status or a transport error is a
//! [`DigestError::Fetch`] and ends the run for that paper.

use crate::error::DigestError;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Build the HTTP client used for PDF downloads.
///
/// `timeout_secs` is the client's own deadline for a whole request.
pub fn build_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, DigestError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| DigestError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Download `url` and return the response body.
pub async fn fetch_pdf(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, DigestError> {
    if !is_url(url) {
        return Err(DigestError::Fetch {
            url: url.to_string(),
            status: None,
            detail: "not an HTTP/HTTPS URL".into(),
        });
    }

    info!("Downloading PDF from: {}", url);

    let response = client.get(url).send().await.map_err(|e| DigestError::Fetch {
        url: url.to_string(),
        status: e.status().map(|s| s.as_u16()),
        detail: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            detail: format!("HTTP {status}"),
        });
    }

    let bytes = response.bytes().await.map_err(|e| DigestError::Fetch {
        url: url.to_string(),
        status: None,
        detail: format!("HTTP {status}, failed reading body: {e}"),
    })?;

    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}
