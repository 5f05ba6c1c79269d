use std::collections::HashSet;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use super::fetcher::FetchError;
use super::parser::{FeedParser, ParsedFeed};
use super::scraper::{FeedSource, Scraper};
use crate::http::{decode_body, HttpClient};
use crate::util::{validate_url, UrlValidationError};

/// Upper bound on single-candidate pages followed before giving up.
const MAX_DISCOVERY_HOPS: usize = 5;

/// Outcome of feed discovery: either a parsed feed or a list to choose from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoverResult {
    /// The address that served the document, to be stored as the feed link.
    Feed { feed_link: String, feed: ParsedFeed },
    /// Several feed links on an HTML page; never empty.
    Sources { sources: Vec<FeedSource> },
}

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The address is not a usable http(s) URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Transport failure, with a DNS or timeout hint where applicable
    #[error(transparent)]
    Network(FetchError),
    #[error("server responded with status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    /// Neither a feed nor an HTML page linking to one
    #[error("no feed found at {url}")]
    NoFeedFound { url: String },
    /// The only feed link leads back to a page already visited
    #[error("feed link {url} points back to a page already visited")]
    Recursion { url: String },
    #[error("gave up after following {0} feed links")]
    TooManyHops(usize),
}

/// Resolve a user-supplied address to a feed.
///
/// A document that parses as a feed is returned with the address it was
/// fetched from. Otherwise the body is scanned as HTML: a single feed link is
/// followed, several are returned for the caller to pick from, none is an
/// error. Following stops at a page already visited or after
/// `MAX_DISCOVERY_HOPS` pages.
pub async fn discover_feed(
    http: &HttpClient,
    parser: &dyn FeedParser,
    scraper: &dyn Scraper,
    url: &str,
) -> Result<DiscoverResult, DiscoveryError> {
    let mut current = url.trim().to_owned();
    let mut visited: HashSet<String> = HashSet::new();

    for _ in 0..MAX_DISCOVERY_HOPS {
        visited.insert(validate_url(&current)?.to_string());

        let response = http
            .get(&current)
            .await
            .map_err(|e| DiscoveryError::Network(FetchError::from_http(&current, e)))?;

        if response.status != StatusCode::OK {
            return Err(DiscoveryError::HttpStatus {
                status: response.status.as_u16(),
                url: current,
            });
        }

        let charset = response.charset();
        match parser.parse_and_fix(&response.body, &current, charset) {
            Ok(feed) => {
                tracing::debug!(url = %current, items = feed.items.len(), "Discovered feed");
                return Ok(DiscoverResult::Feed {
                    feed_link: current,
                    feed,
                });
            }
            Err(e) => {
                tracing::debug!(url = %current, error = %e, "Not a feed, scanning as HTML");
            }
        }

        let html = decode_body(&response.body, charset);
        let mut sources = scraper.find_feed_links(&html, &response.url);

        match sources.len() {
            0 => return Err(DiscoveryError::NoFeedFound { url: current }),
            1 => {
                let next = sources.remove(0).url;
                let seen = validate_url(&next)
                    .map(|u| visited.contains(u.as_str()))
                    .unwrap_or(false);
                if seen || next == current {
                    return Err(DiscoveryError::Recursion { url: next });
                }
                tracing::debug!(from = %current, to = %next, "Following single feed link");
                current = next;
            }
            _ => return Ok(DiscoverResult::Sources { sources }),
        }
    }

    Err(DiscoveryError::TooManyHops(MAX_DISCOVERY_HOPS))
}
