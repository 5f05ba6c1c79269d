//! HTTP access layer.
//!
//! Every request carries the configured `User-Agent`, may carry cache
//! validators, and is retried with exponential backoff when the failure looks
//! like a timeout, DNS or connection problem. Status codes are never errors at
//! this level: callers decide what a 404 or a 304 means.

mod charset;
mod client;
mod retry;

pub use charset::{charset_from_content_type, decode_body};
pub use client::{HttpClient, HttpResponse};
pub use retry::{is_transient_message, with_backoff, RetryPolicy};

use crate::util::UrlValidationError;
use std::io::ErrorKind;
use thiserror::Error;

/// Errors that can occur while performing a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The URL failed syntactic validation; nothing was sent
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Transport-level failure (DNS, connect, TLS, body read)
    #[error("{}", error_chain(.0))]
    Request(#[from] reqwest::Error),
    /// No response headers arrived within the configured budget
    #[error("timed out waiting for response headers")]
    HeaderTimeout,
    /// The caller's cancellation token fired
    #[error("request cancelled")]
    Cancelled,
    /// Response body exceeded the configured size limit
    #[error("response too large")]
    TooLarge,
}

impl HttpError {
    /// Timeouts, refused or reset connections and DNS resolver failures are
    /// worth retrying. TLS and certificate failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Request(e) => {
                e.is_timeout()
                    || (e.is_connect() && has_transient_io_error(e))
                    || is_transient_message(&error_chain(e))
            }
            HttpError::HeaderTimeout => true,
            HttpError::InvalidUrl(_) | HttpError::Cancelled | HttpError::TooLarge => false,
        }
    }
}

/// Looks through the source chain for a socket error that a later attempt
/// could plausibly avoid. rustls reports handshake failures as `InvalidData`
/// I/O errors, which never match.
fn has_transient_io_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

/// Formats an error together with its `source()` chain, which is where
/// reqwest keeps the DNS and socket details.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
