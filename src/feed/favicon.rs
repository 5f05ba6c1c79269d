//! Favicon lookup.
//!
//! Candidates are tried in order: icons linked from the site's own page, then
//! `/favicon.ico` on the site host, then `/favicon.ico` on the feed host. A
//! candidate is accepted only if its bytes are an ICO, PNG, JPEG or GIF image,
//! whatever the server claims the content type is.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::fetcher::{page_text, FetchError};
use super::scraper::Scraper;
use crate::http::{HttpClient, HttpError};
use crate::util::favicon_url;

/// Image formats accepted as an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    Ico,
    Png,
    Jpeg,
    Gif,
}

/// Result of a lookup that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaviconLookup {
    Found {
        url: String,
        kind: IconKind,
        bytes: Vec<u8>,
    },
    /// Every candidate failed; `reason` describes the last failure.
    Missing { reason: Option<String> },
}

#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("favicon lookup cancelled")]
    Cancelled,
}

/// Classify image bytes by their leading signature.
pub fn sniff_icon(bytes: &[u8]) -> Option<IconKind> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

    if bytes.starts_with(&[0, 0, 1, 0]) || bytes.starts_with(&[0, 0, 2, 0]) {
        Some(IconKind::Ico)
    } else if bytes.starts_with(PNG) {
        Some(IconKind::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(IconKind::Jpeg)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(IconKind::Gif)
    } else {
        None
    }
}

/// Look for a usable icon for a feed. Every request observes `cancel`, and
/// firing it yields [`FaviconError::Cancelled`] rather than a missing icon.
pub async fn resolve_favicon(
    http: &HttpClient,
    scraper: &dyn Scraper,
    site_url: &str,
    feed_url: &str,
    cancel: &CancellationToken,
) -> Result<FaviconLookup, FaviconError> {
    if cancel.is_cancelled() {
        return Err(FaviconError::Cancelled);
    }

    let mut candidates: Vec<String> = Vec::new();
    let mut reason: Option<String> = None;

    if !site_url.is_empty() {
        match http.get_with_cancel(site_url, cancel).await {
            Ok(response) => match page_text(&response, site_url) {
                Ok(html) => candidates.extend(scraper.find_icon_links(&html, &response.url)),
                Err(e) => reason = Some(e.to_string()),
            },
            Err(HttpError::Cancelled) => return Err(FaviconError::Cancelled),
            Err(e) => reason = Some(FetchError::from_http(site_url, e).to_string()),
        }
    }

    for link in [site_url, feed_url] {
        if let Ok(icon) = favicon_url(link) {
            candidates.push(icon);
        }
    }

    let mut tried: Vec<&str> = Vec::new();
    for candidate in &candidates {
        if tried.contains(&candidate.as_str()) {
            continue;
        }
        tried.push(candidate);

        if cancel.is_cancelled() {
            return Err(FaviconError::Cancelled);
        }

        let response = match http.get_with_cancel(candidate, cancel).await {
            Ok(response) => response,
            Err(HttpError::Cancelled) => return Err(FaviconError::Cancelled),
            Err(e) => {
                reason = Some(FetchError::from_http(candidate, e).to_string());
                continue;
            }
        };

        if response.status != StatusCode::OK {
            reason = Some(format!(
                "{candidate}: server responded with code {}",
                response.status.as_u16()
            ));
            continue;
        }

        match sniff_icon(&response.body) {
            Some(kind) => {
                tracing::debug!(url = %candidate, ?kind, "Found favicon");
                return Ok(FaviconLookup::Found {
                    url: candidate.clone(),
                    kind,
                    bytes: response.body,
                });
            }
            None => {
                let declared = response.header(CONTENT_TYPE).unwrap_or("no content type");
                reason = Some(format!("{candidate}: unsupported content ({declared})"));
            }
        }
    }

    Ok(FaviconLookup::Missing { reason })
}
