//! Circuit breaker guarding every synchronous outbound call (user service, template
//! service, gateway, and one per provider family).

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a half-open probe.
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
        }
    }
}

/// One breaker per dependency. The half-open state admits exactly one probe and
/// decides on its outcome alone — unlike a multi-probe `success_threshold` scheme,
/// the spec calls for an immediate closed/open decision from a single call.
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU32,
    /// Guards the half-open state so exactly one concurrent caller gets the probe.
    probe_in_flight: AtomicU8,
    last_state_change_ms: AtomicI64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            probe_in_flight: AtomicU8::new(0),
            last_state_change_ms: AtomicI64::new(current_time_ms()),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may proceed. In `half_open`, returns `true` only to the single
    /// caller that wins the probe race; subsequent concurrent callers get `false`
    /// until that probe resolves.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .probe_in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    pub fn record_success(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Closed);
                tracing::info!(breaker = %self.name, "circuit breaker closed after successful probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    tracing::warn!(breaker = %self.name, failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
                tracing::warn!(breaker = %self.name, "circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {
                self.last_state_change_ms
                    .store(current_time_ms(), Ordering::Release);
            }
        }
    }

    fn check_state_transition(&self) {
        if CircuitState::from(self.state.load(Ordering::Acquire)) != CircuitState::Open {
            return;
        }

        let last_change = self.last_state_change_ms.load(Ordering::Acquire);
        let elapsed = current_time_ms() - last_change;

        if elapsed >= self.config.open_timeout_ms as i64
            && self
                .state
                .compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.probe_in_flight.store(0, Ordering::Release);
            self.last_state_change_ms
                .store(current_time_ms(), Ordering::Release);
            tracing::info!(breaker = %self.name, "circuit breaker transitioning to half-open");
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        self.state.store(new_state as u8, Ordering::Release);
        self.last_state_change_ms
            .store(current_time_ms(), Ordering::Release);
        self.probe_in_flight.store(0, Ordering::Release);
        if new_state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::Release);
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            last_state_change_ms: self.last_state_change_ms.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_state_change_ms: i64,
}

/// Dependency-keyed registry: `user-service`, `template-service`, `gateway`, and one
/// per provider family. Constructed once in `AppState` and injected, never a global.
pub struct BreakerRegistry {
    breakers: dashmap::DashMap<&'static str, std::sync::Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            config,
        }
    }

    pub fn get(&self, dependency: &'static str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(dependency)
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::with_config(dependency, self.config.clone()))
            })
            .clone()
    }

    pub fn snapshot(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.iter().map(|e| e.value().stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new("test");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_opens_on_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout_ms: 1_000,
        };
        let cb = CircuitBreaker::with_config("test", config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout_ms: 1_000,
        };
        let cb = CircuitBreaker::with_config("test", config);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_half_open_admits_single_probe() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout_ms: 20,
        };
        let cb = CircuitBreaker::with_config("test", config);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.allow_request());
        // A second concurrent caller must not also get the probe.
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_closes_after_successful_probe() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout_ms: 10,
        };
        let cb = CircuitBreaker::with_config("test", config);

        cb.record_failure();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_reopens_on_half_open_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout_ms: 10,
        };
        let cb = CircuitBreaker::with_config("test", config);

        cb.record_failure();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_registry_returns_same_breaker_for_same_key() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("user-service");
        let b = registry.get("user-service");
        a.record_failure();
        assert_eq!(b.stats().failure_count, 1);
    }

    #[test]
    fn test_registry_isolates_different_dependencies() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout_ms: 60_000,
        });
        registry.get("user-service").record_failure();
        assert_eq!(registry.get("user-service").state(), CircuitState::Open);
        assert_eq!(registry.get("template-service").state(), CircuitState::Closed);
    }
}
