//! Preference cache fronting the (out-of-scope) user service. A Redis-backed
//! implementation is used in production, guarded by the same breaker that guards
//! the direct HTTP call; an in-memory fallback backs integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::domain::preferences::UserPreferenceSnapshot;
use crate::error::AppError;
use crate::resilience::breaker::CircuitBreaker;

#[async_trait]
pub trait PreferenceCache: Send + Sync {
    async fn get(&self, user_id: uuid::Uuid) -> Result<Option<UserPreferenceSnapshot>, AppError>;
    async fn set(&self, snapshot: &UserPreferenceSnapshot) -> Result<(), AppError>;
    async fn invalidate(&self, user_id: uuid::Uuid) -> Result<(), AppError>;
}

fn cache_key(user_id: uuid::Uuid) -> String {
    format!("notifyfabric:prefs:{user_id}")
}

/// Redis-backed cache. Every call is gated by `allow_request` on the shared
/// "user-preference-cache" breaker — a tripped breaker is treated as a cache
/// miss so the orchestrator falls through to the user service directly.
pub struct RedisPreferenceCache {
    client: redis::Client,
    breaker: Arc<CircuitBreaker>,
    ttl: Duration,
}

impl RedisPreferenceCache {
    pub fn new(url: &str, breaker: Arc<CircuitBreaker>, ttl: Duration) -> Result<Self, AppError> {
        let client = redis::Client::open(url).map_err(AppError::Cache)?;
        Ok(Self { client, breaker, ttl })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Cache)
    }
}

#[async_trait]
impl PreferenceCache for RedisPreferenceCache {
    async fn get(&self, user_id: uuid::Uuid) -> Result<Option<UserPreferenceSnapshot>, AppError> {
        if !self.breaker.allow_request() {
            return Ok(None);
        }

        let result: Result<Option<String>, redis::RedisError> = async {
            let mut conn = self.connection().await?;
            conn.get(cache_key(user_id)).await
        }
        .await;

        match result {
            Ok(Some(raw)) => {
                self.breaker.record_success();
                match serde_json::from_str(&raw) {
                    Ok(snapshot) => Ok(Some(snapshot)),
                    Err(_) => Ok(None),
                }
            }
            Ok(None) => {
                self.breaker.record_success();
                Ok(None)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AppError::Cache(e))
            }
        }
    }

    async fn set(&self, snapshot: &UserPreferenceSnapshot) -> Result<(), AppError> {
        if !self.breaker.allow_request() {
            return Ok(());
        }

        let raw = serde_json::to_string(snapshot)
            .map_err(|e| AppError::Internal(format!("failed to serialize preference snapshot: {e}")))?;

        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.connection().await?;
            conn.set_ex(cache_key(snapshot.user_id), raw, self.ttl.as_secs())
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AppError::Cache(e))
            }
        }
    }

    async fn invalidate(&self, user_id: uuid::Uuid) -> Result<(), AppError> {
        if !self.breaker.allow_request() {
            return Ok(());
        }

        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.connection().await?;
            conn.del(cache_key(user_id)).await
        }
        .await;

        match result {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(AppError::Cache(e))
            }
        }
    }
}

/// DashMap-based cache with no TTL enforcement, used by integration tests that
/// don't run against a real Redis instance.
#[derive(Default)]
pub struct InMemoryPreferenceCache {
    store: dashmap::DashMap<uuid::Uuid, UserPreferenceSnapshot>,
}

impl InMemoryPreferenceCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceCache for InMemoryPreferenceCache {
    async fn get(&self, user_id: uuid::Uuid) -> Result<Option<UserPreferenceSnapshot>, AppError> {
        Ok(self.store.get(&user_id).map(|e| e.value().clone()))
    }

    async fn set(&self, snapshot: &UserPreferenceSnapshot) -> Result<(), AppError> {
        self.store.insert(snapshot.user_id, snapshot.clone());
        Ok(())
    }

    async fn invalidate(&self, user_id: uuid::Uuid) -> Result<(), AppError> {
        self.store.remove(&user_id);
        Ok(())
    }
}
