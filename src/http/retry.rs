use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::HttpError;
use crate::config::HttpConfig;

/// Where a resolver failure is reported from.
const RESOLVER_CONTEXT: [&str; 2] = ["dns error", "dial tcp"];

/// Resolver failures worth retrying. Only counted next to a [`RESOLVER_CONTEXT`] marker.
const RESOLVER_FAILURES: [&str; 7] = [
    "lookup",
    "server misbehaving",
    "no such host",
    "i/o timeout",
    "no record found",
    "name or service not known",
    "temporary failure in name resolution",
];

/// Bounded exponential backoff: `max_attempts` tries in total, sleeping
/// `initial_delay`, then twice that, and so on between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_secs(config.initial_backoff_secs),
        }
    }
}

/// True when an error message reads like a DNS resolution failure.
pub fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RESOLVER_CONTEXT.iter().any(|p| message.contains(p))
        && RESOLVER_FAILURES.iter().any(|p| message.contains(p))
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. The last error is returned on exhaustion.
///
/// Sleeps only block the calling task. Cancelling `cancel` aborts both an
/// in-flight attempt and a pending backoff sleep with [`HttpError::Cancelled`].
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    url: &str,
    mut attempt: F,
) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut tries = 0;

    loop {
        tries += 1;
        if cancel.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            result = attempt() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || tries >= max_attempts {
            return Err(err);
        }

        tracing::warn!(
            url = %url,
            attempt = tries,
            delay_secs = delay.as_secs_f64(),
            error = %err,
            "Transient network failure, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2);
    }
}
