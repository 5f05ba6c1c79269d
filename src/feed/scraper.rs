use serde::Serialize;

use crate::util::resolve_url;

/// A feed link found on an HTML page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSource {
    pub title: String,
    pub url: String,
}

/// Extracts candidate feed and icon links from HTML markup.
pub trait Scraper: Send + Sync {
    /// Feed links in document order, resolved against `base_url`, without duplicates.
    fn find_feed_links(&self, html: &str, base_url: &str) -> Vec<FeedSource>;

    /// Icon links in document order, resolved against `base_url`, without duplicates.
    fn find_icon_links(&self, html: &str, base_url: &str) -> Vec<String>;
}

const FEED_TYPES: [&str; 3] = [
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
];

const FEED_SUFFIXES: [&str; 3] = [".rss", ".atom", ".xml"];
const FEED_SEGMENTS: [&str; 3] = ["rss", "atom", "feed"];

/// String-scanning [`Scraper`]. Tolerates attribute reordering, either quote
/// style and unquoted values; does not build a DOM.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlScraper;

impl Scraper for HtmlScraper {
    fn find_feed_links(&self, html: &str, base_url: &str) -> Vec<FeedSource> {
        let mut sources = Vec::new();

        for tag in tags(html, "link") {
            let is_feed = attr(tag.open, "type").is_some_and(|t| {
                let t = t.trim().to_ascii_lowercase();
                FEED_TYPES.contains(&t.as_str())
            });
            if !is_feed {
                continue;
            }
            if let Some(href) = attr(tag.open, "href").filter(|h| !h.trim().is_empty()) {
                let title = attr(tag.open, "title").unwrap_or_default();
                push_source(&mut sources, title, href, base_url);
            }
        }

        if !sources.is_empty() {
            return sources;
        }

        for tag in tags(html, "a") {
            let Some(href) = attr(tag.open, "href") else {
                continue;
            };
            if !looks_like_feed(href) {
                continue;
            }
            let title = attr(tag.open, "title")
                .map(str::to_string)
                .unwrap_or_else(|| inner_text(tag.rest, "a"));
            push_source(&mut sources, &title, href, base_url);
        }

        sources
    }

    fn find_icon_links(&self, html: &str, base_url: &str) -> Vec<String> {
        let mut icons: Vec<String> = Vec::new();

        for tag in tags(html, "link") {
            let is_icon = attr(tag.open, "rel")
                .is_some_and(|rel| rel.to_ascii_lowercase().contains("icon"));
            if !is_icon {
                continue;
            }
            if let Some(href) = attr(tag.open, "href").filter(|h| !h.trim().is_empty()) {
                let resolved = resolve_url(&decode_entities(href), base_url);
                if !icons.contains(&resolved) {
                    icons.push(resolved);
                }
            }
        }

        icons
    }
}

fn push_source(sources: &mut Vec<FeedSource>, title: &str, href: &str, base_url: &str) {
    let url = resolve_url(&decode_entities(href), base_url);
    if sources.iter().any(|s| s.url == url) {
        return;
    }
    sources.push(FeedSource {
        title: decode_entities(title.trim()),
        url,
    });
}

fn looks_like_feed(href: &str) -> bool {
    let path = href
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    FEED_SUFFIXES.iter().any(|s| path.ends_with(s))
        || path
            .split('/')
            .any(|segment| FEED_SEGMENTS.contains(&segment))
}

struct Tag<'a> {
    /// The opening tag, `<name ...>` inclusive.
    open: &'a str,
    /// Everything after the opening tag.
    rest: &'a str,
}

/// Opening tags named `name`, case-insensitively.
fn tags<'a>(html: &'a str, name: &str) -> impl Iterator<Item = Tag<'a>> + 'a {
    // ASCII lowering keeps byte offsets aligned with the original
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{name}");
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(pos) = lower[from..].find(&needle) {
        let start = from + pos;
        let after = start + needle.len();
        let boundary = lower[after..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/');

        let Some(end) = lower[start..].find('>').map(|e| start + e) else {
            break;
        };
        if boundary {
            found.push(Tag {
                open: &html[start..=end],
                rest: &html[end + 1..],
            });
        }
        from = end + 1;
    }

    found.into_iter()
}

/// Value of attribute `name` in an opening tag. Names match case-insensitively
/// and only at an attribute boundary (`href` does not match `data-href`).
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut from = 0;

    while let Some(pos) = lower[from..].find(name) {
        let start = from + pos;
        from = start + name.len();

        let at_boundary = start > 0 && bytes[start - 1].is_ascii_whitespace();
        if !at_boundary {
            continue;
        }

        let after_name = lower[from..].trim_start();
        let Some(after_eq) = after_name.strip_prefix('=') else {
            continue;
        };
        let value = after_eq.trim_start();
        let value_start = tag.len() - value.len();
        let original = &tag[value_start..];

        return match original.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &original[1..];
                inner.find(q).map(|end| &inner[..end])
            }
            Some(_) => {
                let end = original
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(original.len());
                Some(&original[..end])
            }
            None => None,
        };
    }

    None
}

/// Text up to the closing tag, with nested markup removed.
fn inner_text(rest: &str, name: &str) -> String {
    let close = format!("</{name}");
    let end = rest
        .to_ascii_lowercase()
        .find(&close)
        .unwrap_or(rest.len());

    let mut text = String::new();
    let mut in_tag = false;
    for c in rest[..end].chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
