use std::borrow::Cow;

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use feed_rs::model::{Entry, Link};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::util::resolve_url;

/// Feed metadata plus its entries, normalized for conversion into items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFeed {
    pub title: String,
    /// Human-facing site address; empty when the feed names none.
    pub site_link: String,
    pub items: Vec<ParsedItem>,
}

/// One feed entry as produced by the parser.
///
/// Attachment addresses use the empty string for "no attachment".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedItem {
    pub guid: String,
    pub date: DateTime<Utc>,
    pub url: String,
    pub title: String,
    pub content: String,
    pub image_url: String,
    pub audio_url: String,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse feed: {0}")]
    Invalid(#[from] feed_rs::parser::ParseFeedError),
}

/// Turns a raw feed document into a [`ParsedFeed`].
pub trait FeedParser: Send + Sync {
    /// Parse `body` fetched from `source_url`, decoding it with `charset`
    /// when the server declared a recognised one.
    fn parse_and_fix(
        &self,
        body: &[u8],
        source_url: &str,
        charset: Option<&'static Encoding>,
    ) -> Result<ParsedFeed, ParseError>;
}

/// [`FeedParser`] backed by `feed-rs` (RSS, Atom and JSON Feed).
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse_and_fix(
        &self,
        body: &[u8],
        source_url: &str,
        charset: Option<&'static Encoding>,
    ) -> Result<ParsedFeed, ParseError> {
        let body = transcode_to_utf8(body, charset);
        let feed = feed_rs::parser::parse(&body[..])?;

        let site_link = site_link(&feed.links, source_url)
            .map(|href| resolve_url(href, source_url))
            .unwrap_or_default();
        let base = if site_link.is_empty() {
            source_url
        } else {
            site_link.as_str()
        };

        let fetched_at = Utc::now();
        let items = feed
            .entries
            .into_iter()
            .map(|entry| convert_entry(entry, base, fetched_at))
            .collect();

        let title = feed
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        Ok(ParsedFeed {
            title,
            site_link,
            items,
        })
    }
}

fn convert_entry(entry: Entry, base: &str, fetched_at: DateTime<Utc>) -> ParsedItem {
    let url = entry_link(&entry.links)
        .map(|href| resolve_url(href, base))
        .unwrap_or_default();
    let date = entry.published.or(entry.updated);
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let guid = generate_guid(Some(entry.id.as_str()), &url, &title, date);
    let image_url = image_url(&entry);
    let audio_url = audio_url(&entry);

    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .unwrap_or_default();

    ParsedItem {
        guid,
        date: date.unwrap_or(fetched_at),
        url,
        title,
        content,
        image_url,
        audio_url,
    }
}

/// Decode a non-UTF-8 document into UTF-8 and rewrite its XML declaration so
/// the parser does not decode it a second time.
fn transcode_to_utf8<'a>(body: &'a [u8], charset: Option<&'static Encoding>) -> Cow<'a, [u8]> {
    let Some(encoding) = charset.filter(|e| *e != UTF_8) else {
        return Cow::Borrowed(body);
    };

    let (text, _, _) = encoding.decode(body);
    let text = match text.find("?>") {
        Some(end) if text.starts_with("<?xml") => {
            let decl = &text[..end];
            let rewritten = rewrite_declared_encoding(decl);
            format!("{}{}", rewritten, &text[end..])
        }
        _ => text.into_owned(),
    };
    Cow::Owned(text.into_bytes())
}

fn rewrite_declared_encoding(decl: &str) -> String {
    let Some(start) = decl.find("encoding=") else {
        return decl.to_string();
    };
    let value_start = start + "encoding=".len();
    let rest = &decl[value_start..];
    let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return decl.to_string();
    };
    match rest[1..].find(quote) {
        Some(len) => format!(
            "{}{quote}UTF-8{quote}{}",
            &decl[..value_start],
            &rest[len + 2..]
        ),
        None => decl.to_string(),
    }
}

fn site_link<'a>(links: &'a [Link], source_url: &str) -> Option<&'a str> {
    links
        .iter()
        .filter(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .map(|l| l.href.as_str())
        .find(|href| !href.is_empty() && *href != source_url)
}

fn entry_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.as_str())
}

fn image_url(entry: &Entry) -> String {
    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    thumbnail
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .filter(|c| has_mime_prefix(c.content_type.as_ref(), "image/"))
                .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        })
        .unwrap_or_default()
}

fn audio_url(entry: &Entry) -> String {
    let media = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| has_mime_prefix(c.content_type.as_ref(), "audio/"))
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

    media
        .or_else(|| {
            entry
                .links
                .iter()
                .filter(|l| l.rel.as_deref() == Some("enclosure"))
                .find(|l| {
                    l.media_type
                        .as_deref()
                        .is_some_and(|t| t.starts_with("audio/"))
                })
                .map(|l| l.href.clone())
        })
        .unwrap_or_default()
}

fn has_mime_prefix<T: std::fmt::Display>(content_type: Option<&T>, prefix: &str) -> bool {
    content_type.is_some_and(|t| t.to_string().starts_with(prefix))
}

fn generate_guid(
    existing: Option<&str>,
    url: &str,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url,
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
