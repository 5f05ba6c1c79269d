use encoding_rs::Encoding;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::charset::charset_from_content_type;
use super::retry::{with_backoff, RetryPolicy};
use super::HttpError;
use crate::config::HttpConfig;
use crate::storage::HttpState;
use crate::util::validate_url;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// The server answered a conditional request with "unchanged".
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Character encoding announced by the Content-Type header, if recognised.
    pub fn charset(&self) -> Option<&'static Encoding> {
        self.header(header::CONTENT_TYPE)
            .and_then(charset_from_content_type)
    }

    /// Cache validators carried by the response, or `None` when it has neither.
    pub fn validators(&self) -> Option<HttpState> {
        let last_modified = self
            .header(header::LAST_MODIFIED)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        let etag = self
            .header(header::ETAG)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        if last_modified.is_none() && etag.is_none() {
            return None;
        }
        Some(HttpState {
            last_modified,
            etag,
        })
    }
}

/// Shared HTTP client for feeds, pages and icons.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_body_bytes: usize,
}

impl HttpClient {
    /// Builds a client with the identification header and timeouts from `config`.
    ///
    /// reqwest's connect timeout spans both the TCP connect and the TLS
    /// handshake, so it is given the sum of the two budgets. The response
    /// header budget is a read timeout on the established connection, so it
    /// starts once the request is on the wire and never includes connecting.
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let connect_timeout = Duration::from_secs(
            config
                .connect_timeout_secs
                .saturating_add(config.tls_handshake_timeout_secs),
        );
        let idle_per_host = if config.keep_alive {
            config.max_idle_per_host
        } else {
            0
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(connect_timeout)
            .read_timeout(Duration::from_secs(config.response_header_timeout_secs))
            .pool_max_idle_per_host(idle_per_host)
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::from(config),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Replaces the retry policy, e.g. to shorten backoff in tests.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.execute(url, None, &CancellationToken::new()).await
    }

    /// GET with `If-Modified-Since` / `If-None-Match` taken from `state`.
    ///
    /// A 304 answer is returned as a normal response; check
    /// [`HttpResponse::is_not_modified`].
    pub async fn get_conditional(
        &self,
        url: &str,
        state: Option<&HttpState>,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(url, state, &CancellationToken::new()).await
    }

    /// GET that aborts with [`HttpError::Cancelled`] once `cancel` fires.
    pub async fn get_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(url, None, cancel).await
    }

    async fn execute(
        &self,
        url: &str,
        state: Option<&HttpState>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        validate_url(url)?;

        let response =
            with_backoff(&self.retry, cancel, url, move || self.send_once(url, state)).await?;

        let final_url = response.url().to_string();
        let status = response.status();
        let headers = response.headers().clone();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            body = read_limited_bytes(response, self.max_body_bytes) => body?,
        };

        Ok(HttpResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }

    async fn send_once(
        &self,
        url: &str,
        state: Option<&HttpState>,
    ) -> Result<reqwest::Response, HttpError> {
        let mut request = self.client.get(url);
        if let Some(state) = state {
            if let Some(last_modified) = state.last_modified.as_deref() {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified);
            }
            if let Some(etag) = state.etag.as_deref() {
                request = request.header(header::IF_NONE_MATCH, etag);
            }
        }

        request.send().await.map_err(|e| {
            // Connect timeouts stay reqwest errors; anything else timing out
            // before the response arrived is the header deadline
            if e.is_timeout() && !e.is_connect() {
                HttpError::HeaderTimeout
            } else {
                HttpError::Request(e)
            }
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, HttpError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(HttpError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HttpError::Request)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(HttpError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
