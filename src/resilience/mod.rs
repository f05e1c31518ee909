pub mod backoff;
pub mod breaker;
pub mod cache;
pub mod retry;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cache::{InMemoryPreferenceCache, PreferenceCache, RedisPreferenceCache};
pub use retry::{RetryPolicy, RetryState};
