//! Reconnection delays with capped exponential backoff.

use std::time::Duration;

/// Maps a retry count to the delay before the next attempt.
///
/// Implementations must be monotonically non-decreasing in `attempt` and
/// bounded: a link keeps retrying forever, so the delay has to plateau.
pub trait Backoff: Send + Sync {
    /// Delay before retry number `attempt` (starting at 1).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Configuration for capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive retries. Values below 1.0 are
    /// treated as 1.0.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial_delay, self.max_delay, self.multiplier)
    }
}

impl Backoff for BackoffConfig {
    fn delay(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt)
    }
}

/// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
///
/// Attempt 0 and 1 both yield `initial_delay`.
#[must_use]
pub fn calculate_backoff(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = multiplier.max(1.0).powi(exponent);
    // Float to int casts saturate, so an infinite factor lands on u64::MAX.
    let delay_millis = (initial_delay.as_millis() as f64 * factor) as u64;
    Duration::from_millis(delay_millis).min(max_delay)
}
