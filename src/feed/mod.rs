//! Everything that turns a URL into feed data.
//!
//! - [`parser`] - feed documents into [`ParsedFeed`] via `feed-rs`
//! - [`scraper`] - feed and icon links out of HTML pages
//! - [`discovery`] - resolve a user-supplied address to a feed
//! - [`favicon`] - locate a site icon under a cancellation deadline
//! - [`fetcher`] - conditional fetch of one feed and conversion into items

pub mod discovery;
pub mod favicon;
pub mod fetcher;
pub mod parser;
pub mod scraper;

pub use discovery::{discover_feed, DiscoverResult, DiscoveryError};
pub use favicon::{resolve_favicon, sniff_icon, FaviconError, FaviconLookup, IconKind};
pub use fetcher::{convert_items, fetch_feed, fetch_page_body, FetchError};
pub use parser::{FeedParser, FeedRsParser, ParseError, ParsedFeed, ParsedItem};
pub use scraper::{FeedSource, HtmlScraper, Scraper};
