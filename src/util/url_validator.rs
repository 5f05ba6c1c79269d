use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string before it is fetched.
///
/// Only syntax is checked here: the string must parse, use `http` or `https`,
/// and name a host. Feeds and favicons live on arbitrary servers, so no host
/// policy is applied.
///
/// # Examples
///
/// ```
/// use feedwell::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("not a url").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Returns the conventional `scheme://host[:port]/favicon.ico` address for a URL.
pub fn favicon_url(link: &str) -> Result<String, UrlValidationError> {
    let url = validate_url(link)?;
    let mut icon = url;
    icon.set_path("/favicon.ico");
    icon.set_query(None);
    icon.set_fragment(None);
    Ok(icon.to_string())
}

/// Resolves a potentially relative URL against a base URL.
///
/// Falls back to the href unchanged when the base cannot be parsed.
pub fn resolve_url(href: &str, base_url: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}
