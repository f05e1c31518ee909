use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use crate::clients::GatewayClient;
use crate::config::Settings;
use crate::repository::DeliveryRepository;
use crate::resilience::BreakerRegistry;

/// Shared state for the always-on Axum surface (webhooks, health, stats,
/// metrics). One instance per process, independent of the queue consumer's
/// own `DeliveryOrchestrator`.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repository: DeliveryRepository,
    pub gateway: Arc<GatewayClient>,
    pub breaker_registry: Arc<BreakerRegistry>,
    pub db_pool: PgPool,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        db_pool: PgPool,
        gateway: Arc<GatewayClient>,
        breaker_registry: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            repository: DeliveryRepository::new(db_pool.clone()),
            settings,
            gateway,
            breaker_registry,
            db_pool,
            start_time: Instant::now(),
        }
    }
}
