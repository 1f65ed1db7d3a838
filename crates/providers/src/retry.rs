//! Shared retry policy for provider network calls.
//!
//! Up to `max_attempts` tries with exponentially growing waits capped at
//! `max_delay`; connection errors and HTTP 429/5xx are retryable, 401/403
//! is a credential failure and gets exactly one attempt. Rate limits wait
//! the separately configured, longer backoff.

use geofuse_common::{FailureKind, RetryConfig};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// A classified request failure.
#[derive(Debug, Clone)]
pub enum RequestError {
    /// Connection error or HTTP 5xx.
    Transient(String),
    /// HTTP 429.
    RateLimited(String),
    /// HTTP 401/403.
    Auth(String),
    /// HTTP 413: the request extent is too large for this endpoint.
    TooLarge(String),
}

impl RequestError {
    pub fn message(&self) -> &str {
        match self {
            RequestError::Transient(m)
            | RequestError::RateLimited(m)
            | RequestError::Auth(m)
            | RequestError::TooLarge(m) => m,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RequestError::Transient(_) => FailureKind::NetworkTransient,
            RequestError::RateLimited(_) => FailureKind::RateLimited,
            RequestError::Auth(_) => FailureKind::AuthInvalid,
            RequestError::TooLarge(_) => FailureKind::PayloadTooLarge,
        }
    }

    fn is_retryable(&self) -> bool {
        self.failure_kind().is_retryable()
    }
}

/// Classify a transport-level error.
pub fn classify_transport(err: &reqwest::Error) -> RequestError {
    RequestError::Transient(err.to_string())
}

/// Classify a non-success HTTP status, if it maps onto the taxonomy.
pub fn classify_status(status: StatusCode, context: &str) -> Option<RequestError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(RequestError::RateLimited(format!("{}: HTTP 429", context)))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(RequestError::Auth(format!("{}: HTTP {}", context, status)))
    } else if status == StatusCode::PAYLOAD_TOO_LARGE {
        Some(RequestError::TooLarge(format!("{}: HTTP 413", context)))
    } else if status.is_server_error() {
        Some(RequestError::Transient(format!(
            "{}: HTTP {}",
            context, status
        )))
    } else if !status.is_success() {
        Some(RequestError::Transient(format!(
            "{}: unexpected HTTP {}",
            context, status
        )))
    } else {
        None
    }
}

/// Wait before retry attempt `attempt` (1-based count of completed tries).
pub fn backoff_delay(policy: &RetryConfig, err: &RequestError, attempt: u32) -> Duration {
    match err {
        RequestError::RateLimited(_) => policy.rate_limit_delay,
        _ => {
            let factor = 1u32 << attempt.saturating_sub(1).min(16);
            policy.base_delay.saturating_mul(factor).min(policy.max_delay)
        }
    }
}

/// Run `op` under the retry policy.
///
/// Non-retryable errors (auth, payload-too-large) return immediately;
/// retryable ones wait the backoff and try again until the attempt budget
/// is spent.
pub async fn with_retry<T, Fut, F>(
    policy: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    warn!(what, attempts = attempt, error = err.message(), "giving up");
                    return Err(err);
                }
                let delay = backoff_delay(policy, &err, attempt);
                warn!(
                    what,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = err.message(),
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
