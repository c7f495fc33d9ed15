//! Exponential backoff for poll loops

use std::time::Duration;

/// Doubling delay, capped
///
/// Attempt 0 waits `initial_ms`, attempt n waits `initial_ms << n`, never
/// more than `max_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    attempt: usize,
}

impl Backoff {
    /// Backoff starting at `initial_ms`, capped at `max_ms`
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Backoff {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            attempt: 0,
        }
    }

    /// Delay for a given attempt
    pub fn delay_for(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow
        let shift = attempt.min(63);
        let delay_ms = self.initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_ms))
    }

    /// Delay for the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        delay
    }

    /// Attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(10, 1000)
    }
}
