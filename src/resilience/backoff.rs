//! Jittered exponential backoff for broker reconnection. Distinct from
//! [`crate::resilience::retry::RetryPolicy`], which governs the bounded,
//! non-jittered retry of the provider send step itself.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
            jitter_factor: 0.2,
        }
    }
}

/// Tracks reconnect attempts and hands back the next delay, capped and jittered.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// `None` once `max_attempts` is exhausted — the caller gives up and surfaces
    /// the broker as unreachable rather than reconnecting forever.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let exp = self.config.base_delay_ms.saturating_mul(1u64 << self.attempt.min(20));
        let capped = exp.min(self.config.max_delay_ms);

        let jitter_range = (capped as f64 * self.config.jitter_factor) as i64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0
        };
        let delayed = (capped as i64 + jitter).max(0) as u64;

        self.attempt += 1;
        Some(Duration::from_millis(delayed))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_increases_with_attempts() {
        let config = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);

        let first = backoff.next_delay().unwrap();
        let second = backoff.next_delay().unwrap();
        let third = backoff.next_delay().unwrap();

        assert_eq!(first, Duration::from_millis(1_000));
        assert_eq!(second, Duration::from_millis(2_000));
        assert_eq!(third, Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = BackoffConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 15_000,
            max_attempts: 10,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);

        backoff.next_delay();
        let capped = backoff.next_delay().unwrap();
        assert_eq!(capped, Duration::from_millis(15_000));
    }

    #[test]
    fn test_backoff_exhausts_after_max_attempts() {
        let config = BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: 2,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.exhausted());
    }

    #[test]
    fn test_backoff_reset_restarts_sequence() {
        let config = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 3,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);

        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        let config = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter_factor: 0.2,
        };
        let mut backoff = ExponentialBackoff::new(config);
        let delay = backoff.next_delay().unwrap().as_millis() as i64;
        assert!((800..=1_200).contains(&delay));
    }
}
