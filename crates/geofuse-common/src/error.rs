//! Failure taxonomy shared by providers and the harmonizer.

use serde::{Deserialize, Serialize};

/// Classification of a provider failure.
///
/// Every provider-facing error is converted into one of these before it
/// crosses the adapter boundary; only internal invariant violations (shape
/// mismatches, invalid region construction) surface as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection error or HTTP 5xx; retryable with bounded attempts.
    NetworkTransient,
    /// HTTP 429; retryable with the longer rate-limit backoff.
    RateLimited,
    /// HTTP 401/403; non-retryable, the provider is disabled for the request.
    AuthInvalid,
    /// The requested extent exceeds the direct-download limit.
    PayloadTooLarge,
    /// A cached artifact failed its integrity check.
    CacheCorrupt,
}

impl FailureKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::NetworkTransient | FailureKind::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(FailureKind::NetworkTransient.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(!FailureKind::AuthInvalid.is_retryable());
        assert!(!FailureKind::PayloadTooLarge.is_retryable());
    }
}
