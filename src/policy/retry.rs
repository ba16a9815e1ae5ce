//! Retry backoff computation.

use rand::Rng;
use std::time::Duration;

/// Backoff tuning for retryable dispatch failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff with jitter for the given 1-based attempt number.
///
/// The raw delay doubles per attempt, capped at `max_delay`, then a
/// uniform multiplier in `[0.5, 1.5)` decorrelates concurrent retriers.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let raw = config
        .base_delay
        .saturating_mul(1u32 << exp)
        .min(config.max_delay);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    raw.mul_f64(jitter)
}
