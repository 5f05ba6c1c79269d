use std::time::{Duration, Instant};

use reqwest::StatusCode;
use thiserror::Error;

use super::parser::{FeedParser, ParseError, ParsedItem};
use crate::http::{decode_body, error_chain, HttpClient, HttpError, HttpResponse};
use crate::storage::{Feed, Item, ItemStatus, Storage};

/// Feeds taking longer than this to fetch and parse are logged.
const SLOW_FEED_THRESHOLD: Duration = Duration::from_secs(10);

const DNS_PATTERNS: [&str; 4] = ["dns error", "lookup", "no such host", "server misbehaving"];
const TIMEOUT_PATTERNS: [&str; 2] = ["i/o timeout", "timed out"];

/// Errors from fetching a single feed or page.
///
/// Network failures carry a hint about the likely cause.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("DNS resolution problem for {url}: {source} (check your network connection or DNS servers)")]
    Dns { url: String, source: HttpError },
    #[error("timeout connecting to {url}: {source} (server may be overloaded or unreachable)")]
    Timeout { url: String, source: HttpError },
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: HttpError },
    #[error("feed not found (404) for {url}")]
    NotFound { url: String },
    #[error("server responded with code {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The worker handling the feed stopped before producing a result
    #[error("refresh worker stopped before this feed completed")]
    Aborted,
}

impl FetchError {
    /// Wraps a transport error, classifying DNS and timeout failures.
    pub fn from_http(url: &str, source: HttpError) -> Self {
        let url = url.to_owned();
        let message = error_chain(&source).to_lowercase();
        let timed_out = matches!(source, HttpError::HeaderTimeout)
            || matches!(&source, HttpError::Request(e) if e.is_timeout())
            || TIMEOUT_PATTERNS.iter().any(|p| message.contains(p));

        if timed_out {
            FetchError::Timeout { url, source }
        } else if DNS_PATTERNS.iter().any(|p| message.contains(p)) {
            FetchError::Dns { url, source }
        } else {
            FetchError::Request { url, source }
        }
    }

    fn from_status(status: StatusCode, url: &str) -> Self {
        if status == StatusCode::NOT_FOUND {
            FetchError::NotFound {
                url: url.to_owned(),
            }
        } else {
            FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            }
        }
    }
}

/// Fetch one feed conditionally and convert its entries into items.
///
/// A "not modified" answer yields no items. Validators returned with a fresh
/// document replace the stored ones; a response without any leaves the stored
/// state alone.
pub async fn fetch_feed(
    http: &HttpClient,
    storage: &dyn Storage,
    parser: &dyn FeedParser,
    feed: &Feed,
) -> Result<Vec<Item>, FetchError> {
    let url = feed.feed_link.as_str();
    let started = Instant::now();

    let state = storage.get_http_state(feed.id).await.unwrap_or_else(|e| {
        tracing::warn!(feed_id = feed.id, error = %e, "Failed to load HTTP state, fetching unconditionally");
        None
    });

    let response = http
        .get_conditional(url, state.as_ref())
        .await
        .map_err(|e| FetchError::from_http(url, e))?;

    if response.is_not_modified() {
        tracing::debug!(feed_id = feed.id, url = %url, "Feed not modified");
        return Ok(Vec::new());
    }
    if !response.status.is_success() {
        return Err(FetchError::from_status(response.status, url));
    }
    let fetch_time = started.elapsed();

    let parsed = parser.parse_and_fix(&response.body, url, response.charset())?;
    let total = started.elapsed();

    if let Some(validators) = response.validators() {
        if let Err(e) = storage.set_http_state(feed.id, &validators).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to store HTTP state");
        }
    }

    if total > SLOW_FEED_THRESHOLD {
        tracing::warn!(
            feed_id = feed.id,
            url = %url,
            fetch_ms = fetch_time.as_millis() as u64,
            parse_ms = (total - fetch_time).as_millis() as u64,
            "Slow feed"
        );
    }

    Ok(convert_items(parsed.items, feed.id))
}

/// Map parsed entries onto persistable items owned by `feed_id`.
///
/// Empty attachment addresses become `None`; every item starts unread.
pub fn convert_items(items: Vec<ParsedItem>, feed_id: i64) -> Vec<Item> {
    items
        .into_iter()
        .map(|item| Item {
            guid: item.guid,
            feed_id,
            title: item.title,
            link: item.url,
            content: item.content,
            date: item.date,
            status: ItemStatus::Unread,
            image_url: non_empty(item.image_url),
            audio_url: non_empty(item.audio_url),
        })
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Fetch a page and decode it as text using the declared charset when
/// recognised. Anything other than 200 is an error.
pub async fn fetch_page_body(http: &HttpClient, url: &str) -> Result<String, FetchError> {
    let response = http
        .get(url)
        .await
        .map_err(|e| FetchError::from_http(url, e))?;
    page_text(&response, url)
}

pub(crate) fn page_text(response: &HttpResponse, url: &str) -> Result<String, FetchError> {
    if response.status != StatusCode::OK {
        return Err(FetchError::from_status(response.status, url));
    }
    Ok(decode_body(&response.body, response.charset()))
}
