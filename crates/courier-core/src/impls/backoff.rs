//! Exponential backoff retry strategy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::RetryStrategy;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// `delay = min(base * multiplier^retry_count, max_delay)`.
///
/// Example with base=1s, multiplier=2.0, max=30s:
/// - retry_count 0: 1s
/// - retry_count 1: 2s
/// - retry_count 2: 4s
/// - retry_count 5 and up: 30s
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetryStrategy {
    config: RetryConfig,
}

impl ExponentialBackoffRetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for ExponentialBackoffRetryStrategy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoffRetryStrategy {
    fn get_delay(&self, retry_count: u32, _message_type: &str) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let uncapped = self.config.delay_ms as f64 * self.config.multiplier.powi(exponent);
        // powi overflows to +inf, which min() clamps like any other large value.
        let millis = uncapped.min(self.config.max_delay_ms as f64).max(0.0);
        Duration::from_millis(millis.round() as u64)
    }

    fn should_retry(&self, retry_count: u32, _message_type: &str) -> bool {
        retry_count < self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HandlerError;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn strategy() -> ExponentialBackoffRetryStrategy {
        ExponentialBackoffRetryStrategy::new(RetryConfig {
            max_retries: 3,
            delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        })
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(1, 2_000)]
    #[case(2, 4_000)]
    #[case(4, 16_000)]
    #[case(5, 30_000)]
    #[case(10, 30_000)]
    #[case(u32::MAX, 30_000)]
    fn delay_grows_exponentially_and_caps(#[case] retry_count: u32, #[case] expected_ms: u64) {
        assert_eq!(
            strategy().get_delay(retry_count, "email.send"),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn delay_strictly_increases_until_cap() {
        let strategy = strategy();
        let delays: Vec<_> = (0..5).map(|n| strategy.get_delay(n, "email.send")).collect();

        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(4, false)]
    #[case(100, false)]
    fn should_retry_respects_budget(#[case] retry_count: u32, #[case] expected: bool) {
        assert_eq!(strategy().should_retry(retry_count, "email.send"), expected);
    }

    #[test]
    fn is_retryable_needs_both_flag_and_budget() {
        let strategy = strategy();

        assert!(strategy.is_retryable(&HandlerError::retryable("timeout"), 0, "email.send"));
        assert!(!strategy.is_retryable(&HandlerError::retryable("timeout"), 3, "email.send"));
        assert!(!strategy.is_retryable(&HandlerError::permanent("bad"), 0, "email.send"));
    }

    #[test]
    fn next_available_time_adds_delay() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = strategy().get_next_available_time(2, "email.send", now);

        assert_eq!(next, now + chrono::Duration::seconds(4));
    }
}
