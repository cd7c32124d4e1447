//! Idle back-off after provider errors.

use std::time::Duration;

/// Exponential back-off, capped.
///
/// Used by the worker loop while the provider keeps failing. The cap is the
/// pump's poll interval: a failing datastore is never polled less often than a
/// healthy one with nothing due.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first consecutive failure.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay after `failures` consecutive failures (1-indexed).
    ///
    /// `base_delay * multiplier^(failures - 1)`, never above `max_delay`.
    /// With base=100ms, max=1s: 100ms, 200ms, 400ms, 800ms, 1s, 1s, ...
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}
