//! Bounded retry for the provider send step. Field names follow the spec's own
//! vocabulary (`min_wait`/`max_wait`) rather than the queue-keeper naming this was
//! grounded on (`initial_delay`/`max_delay`); unlike the broker reconnect backoff,
//! no jitter is applied here by default so retry timing in tests stays deterministic.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_wait: Duration::from_millis(1_000),
            max_wait: Duration::from_millis(10_000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            min_wait,
            max_wait,
            multiplier,
        }
    }

    /// Delay to wait before attempt number `attempt` (1-indexed: the delay before
    /// the *second* send attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.min_wait.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_wait)
    }

    /// `attempt` is the number of attempts already made (1 after the first try).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Tracks retry progress for a single delivery attempt sequence.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn record_attempt(&mut self) {
        self.attempt += 1;
    }
}
