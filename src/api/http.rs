//! Retrying HTTP sends shared by the Google and language model clients.

use crate::Result;
use anyhow::{bail, Context};
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

/// The longest `Retry-After` we are willing to honor.
const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) initial_backoff_ms: u64,
    pub(crate) max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
    }
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let millis = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(millis)
}

/// Sends `request`, retrying on throttling, server errors, timeouts and connection failures. The
/// final response is returned whatever its status; use `ensure_success` to turn that into an
/// error.
pub(crate) async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        // Streaming bodies cannot be cloned, so those get exactly one try.
        let Some(cloned) = request.try_clone() else {
            return request.send().await.context("HTTP request failed");
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    warn!("Retry {attempt}/{attempts} after status {status} (sleep {delay:?})");
                    tokio::time::sleep(delay).await;
                } else {
                    return Ok(response);
                }
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    warn!("Retry {attempt}/{attempts} after transport error: {err} (sleep {delay:?})");
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(err).context("HTTP request failed");
                }
            }
        }
        attempt += 1;
    }
}

/// Passes through a successful response, otherwise fails with the status and body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    bail!("{what} failed with status {status}: {body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(Duration::from_millis(250), retry_delay(1, &policy, None));
        assert_eq!(Duration::from_millis(500), retry_delay(2, &policy, None));
        assert_eq!(Duration::from_millis(2_000), retry_delay(9, &policy, None));
    }

    #[test]
    fn test_retry_after_is_honored_and_capped() {
        let policy = RetryPolicy::default();
        let header = HeaderValue::from_static("4");
        assert_eq!(Duration::from_secs(4), retry_delay(1, &policy, Some(&header)));
        let header = HeaderValue::from_static("600");
        assert_eq!(Duration::from_secs(30), retry_delay(1, &policy, Some(&header)));
        let header = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(Duration::from_millis(250), retry_delay(1, &policy, Some(&header)));
    }
}
