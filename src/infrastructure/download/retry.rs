//! Retry parameterization for download attempts.

use std::time::Duration;

use crate::domain::errors::FetchError;

/// Attempt count and delay growth for retryable download failures.
///
/// Pure value; the downloader consults it between attempts. Attempt
/// numbering starts at zero, so the first retry waits `base_delay` and
/// each further retry multiplies the previous delay by
/// `backoff_multiplier`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; zero makes the first failure terminal.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retries: every failure is terminal.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Balanced default: 3 retries, 1s base, doubling, 30s cap.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Eager: 5 retries, 500ms base, 1.5x growth, 30s cap.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Reluctant: 2 retries, 2s base, 3x growth, 30s cap.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            backoff_multiplier: 3.0,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Returns the delay before retrying after failed attempt `attempt`
    /// (zero-based): `min(max_delay, base_delay * multiplier^attempt)`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }

    /// Returns true if attempt `attempt` (zero-based) may be retried
    /// after `error`.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, Duration::from_secs(1); "first retry")]
    #[test_case(1, Duration::from_secs(2); "second retry")]
    #[test_case(2, Duration::from_secs(4); "third retry")]
    #[test_case(10, Duration::from_secs(30); "capped at max delay")]
    fn test_standard_backoff(attempt: u32, expected: Duration) {
        assert_eq!(RetryPolicy::standard().delay_for(attempt), expected);
    }

    #[test]
    fn test_none_is_terminal_on_first_failure() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(0, &FetchError::Timeout));
    }

    #[test]
    fn test_should_retry_respects_budget_and_kind() {
        let policy = RetryPolicy::standard();
        assert!(policy.should_retry(0, &FetchError::HttpStatus(503)));
        assert!(policy.should_retry(2, &FetchError::Timeout));
        assert!(!policy.should_retry(3, &FetchError::Timeout));
        assert!(!policy.should_retry(0, &FetchError::HttpStatus(403)));
        assert!(!policy.should_retry(0, &FetchError::Cancelled));
    }

    #[test]
    fn test_aggressive_grows_slower() {
        let policy = RetryPolicy::aggressive();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(750));
    }
}
