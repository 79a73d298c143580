//! Retry utilities for chat-completion failures.
//!
//! Rate-limit failures wait out a cooldown; everything else backs off
//! linearly with the attempt number.

use crate::error::ProviderError;
use std::time::Duration;

/// Floor for the rate-limit cooldown.
const MIN_COOLDOWN: Duration = Duration::from_secs(5);

/// Whether the error signals rate limiting (HTTP 429 or a matching message).
pub fn is_rate_limited(error: &ProviderError) -> bool {
    match error {
        ProviderError::Http {
            status_code: Some(429),
            ..
        } => true,
        ProviderError::Http { message, .. } | ProviderError::Response { message, .. } => {
            message.contains("429") || message.to_lowercase().contains("rate limit")
        }
        _ => false,
    }
}

/// Cooldown after a rate-limit failure: twice the minimum interval, at least 5s.
pub fn rate_limit_cooldown(min_interval: Duration) -> Duration {
    (min_interval * 2).max(MIN_COOLDOWN)
}

/// Linear backoff: `retry_delay * attempt`, attempts counted from 1.
pub fn backoff_duration(attempt: u32, retry_delay: Duration) -> Duration {
    retry_delay.saturating_mul(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(message: &str, status_code: Option<u16>) -> ProviderError {
        ProviderError::Http {
            provider: "AI".to_string(),
            message: message.to_string(),
            status_code,
        }
    }

    #[test]
    fn test_status_429_is_rate_limited() {
        assert!(is_rate_limited(&http("Too Many Requests", Some(429))));
    }

    #[test]
    fn test_rate_limit_text_is_detected() {
        assert!(is_rate_limited(&http("Rate limit reached for requests", None)));
        assert!(is_rate_limited(&http("Error code: 429", Some(400))));
    }

    #[test]
    fn test_other_errors_are_not_rate_limited() {
        assert!(!is_rate_limited(&http("unauthorized", Some(401))));
        assert!(!is_rate_limited(&ProviderError::Timeout {
            provider: "AI".to_string(),
            timeout_ms: 30_000,
        }));
    }

    #[test]
    fn test_cooldown_has_floor() {
        assert_eq!(rate_limit_cooldown(Duration::from_secs(1)), Duration::from_secs(5));
        assert_eq!(rate_limit_cooldown(Duration::from_secs(4)), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_linear() {
        let delay = Duration::from_secs(2);
        assert_eq!(backoff_duration(1, delay), Duration::from_secs(2));
        assert_eq!(backoff_duration(2, delay), Duration::from_secs(4));
        assert_eq!(backoff_duration(3, delay), Duration::from_secs(6));
    }
}
