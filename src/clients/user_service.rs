//! Client for the out-of-scope user service: notification preferences and
//! channel addresses. Fronted by the preference cache and guarded by the
//! `user-service` breaker.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Channel, UserPreferenceSnapshot};
use crate::resilience::{CircuitBreaker, PreferenceCache};

/// Outcome of resolving a user's preferences, distinguishing "the user service
/// answered and there's nothing there" from "the breaker is open and we're
/// flying blind" — the orchestrator treats these very differently.
#[derive(Debug, Clone)]
pub enum PreferenceLookup {
    Found(UserPreferenceSnapshot),
    NotFound,
    /// Breaker open (or the call failed outright): synthesize the conservative
    /// default at the call site.
    Unavailable,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PreferencesPayload {
    email_enabled: bool,
    push_enabled: bool,
    #[serde(default)]
    email: Option<String>,
}

enum FetchOutcome {
    Success(UserPreferenceSnapshot),
    NotFound,
    Transient,
}

pub struct UserServiceClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<dyn PreferenceCache>,
    cache_ttl: Duration,
}

impl UserServiceClient {
    pub fn new(
        base_url: impl Into<String>,
        http: reqwest::Client,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<dyn PreferenceCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            breaker,
            cache,
            cache_ttl,
        }
    }

    /// Resolve the snapshot for `user_id`, fetching the push token too when the
    /// job is for the push channel and the user hasn't opted out.
    pub async fn resolve(&self, user_id: Uuid, channel: Channel) -> PreferenceLookup {
        if let Ok(Some(cached)) = self.cache.get(user_id).await {
            return PreferenceLookup::Found(cached);
        }

        if !self.breaker.allow_request() {
            return PreferenceLookup::Unavailable;
        }

        match self.fetch_preferences(user_id).await {
            FetchOutcome::Success(mut snapshot) => {
                self.breaker.record_success();
                if channel == Channel::Push && snapshot.push_enabled && snapshot.push_token.is_none() {
                    snapshot.push_token = self.fetch_push_token(user_id).await;
                }
                let _ = self.cache.set(&snapshot).await;
                PreferenceLookup::Found(snapshot)
            }
            FetchOutcome::NotFound => {
                self.breaker.record_success();
                PreferenceLookup::NotFound
            }
            FetchOutcome::Transient => {
                self.breaker.record_failure();
                PreferenceLookup::Unavailable
            }
        }
    }

    /// Cache TTL this client was configured with (exposed for tests that
    /// assert on cache-correctness behavior).
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    async fn fetch_preferences(&self, user_id: Uuid) -> FetchOutcome {
        let url = format!("{}/users/{}/preferences", self.base_url, user_id);
        let response = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return if e.is_timeout() || e.is_connect() {
                    FetchOutcome::Transient
                } else {
                    FetchOutcome::NotFound
                }
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return FetchOutcome::NotFound;
        }
        if response.status().is_server_error() {
            return FetchOutcome::Transient;
        }
        if !response.status().is_success() {
            return FetchOutcome::NotFound;
        }

        match response.json::<Envelope<PreferencesPayload>>().await {
            Ok(envelope) if envelope.success => match envelope.data {
                Some(payload) => FetchOutcome::Success(UserPreferenceSnapshot {
                    user_id,
                    email_enabled: payload.email_enabled,
                    push_enabled: payload.push_enabled,
                    email_address: payload.email,
                    push_token: None,
                }),
                None => FetchOutcome::NotFound,
            },
            Ok(_) => FetchOutcome::NotFound,
            Err(_) => FetchOutcome::Transient,
        }
    }

    /// Best-effort; a failure here just leaves `push_token` unset, which the
    /// orchestrator turns into `NO_ADDRESS` downstream rather than retrying.
    async fn fetch_push_token(&self, user_id: Uuid) -> Option<String> {
        let url = format!("{}/users/{}/push-token", self.base_url, user_id);
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let token = response.text().await.ok()?;
        let trimmed = token.trim().trim_matches('"');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, InMemoryPreferenceCache};

    fn client(base_url: String) -> UserServiceClient {
        UserServiceClient::new(
            base_url,
            reqwest::Client::new(),
            Arc::new(CircuitBreaker::with_config(
                "user-service",
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    open_timeout_ms: 60_000,
                },
            )),
            Arc::new(InMemoryPreferenceCache::new()),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_resolve_is_unavailable_when_breaker_open() {
        let c = client("http://127.0.0.1:1".to_string());
        for _ in 0..5 {
            c.breaker.record_failure();
        }
        let result = c.resolve(Uuid::new_v4(), Channel::Email).await;
        assert!(matches!(result, PreferenceLookup::Unavailable));
    }

    #[tokio::test]
    async fn test_resolve_uses_cache_before_http() {
        let c = client("http://127.0.0.1:1".to_string());
        let user_id = Uuid::new_v4();
        let snapshot = UserPreferenceSnapshot {
            user_id,
            email_enabled: true,
            push_enabled: false,
            email_address: Some("a@b.com".to_string()),
            push_token: None,
        };
        c.cache.set(&snapshot).await.unwrap();

        let result = c.resolve(user_id, Channel::Email).await;
        match result {
            PreferenceLookup::Found(found) => assert_eq!(found.email_address, snapshot.email_address),
            _ => panic!("expected cache hit"),
        }
    }
}
