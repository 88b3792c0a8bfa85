//! Backoff strategy for conflict retries.

use std::time::Duration;

/// Delay grows linearly with the attempt number: `base`, `2 * base`,
/// `3 * base`, and so on. Composes with `tokio_retry` strategies via
/// `Iterator`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.base.saturating_mul(self.attempt))
    }
}
