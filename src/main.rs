use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use notify_fabric::clients::{GatewayClient, TemplateServiceClient, UserServiceClient};
use notify_fabric::config::Settings;
use notify_fabric::domain::Channel;
use notify_fabric::orchestrator::DeliveryOrchestrator;
use notify_fabric::queue::QueueConsumer;
use notify_fabric::repository::DeliveryRepository;
use notify_fabric::resilience::{
    BreakerRegistry, CircuitBreakerConfig, InMemoryPreferenceCache, PreferenceCache,
    RedisPreferenceCache, RetryPolicy,
};
use notify_fabric::server::{create_app, AppState};
use notify_fabric::shutdown::{with_grace_period, Shutdown, ShutdownConfig};
use notify_fabric::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("failed to load configuration")?;
    let _telemetry_guard =
        init_telemetry(&settings.otel).context("failed to initialize telemetry")?;

    tracing::info!(channel = settings.channel.as_str(), "configuration loaded");

    let settings = Arc::new(settings);
    let channel: Channel = settings.channel.into();

    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size + settings.database.pool_overflow)
        .acquire_timeout(Duration::from_secs(settings.database.connect_timeout_seconds as u64))
        .connect(&settings.database.url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database pool established");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("database migration failed")?;
    tracing::info!("database migrations applied");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_seconds))
        .build()
        .context("failed to build HTTP client")?;

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: settings.breaker.failure_threshold,
        open_timeout_ms: settings.breaker.open_timeout_seconds * 1_000,
    };
    let breaker_registry = Arc::new(BreakerRegistry::new(breaker_config));

    let cache_ttl = Duration::from_secs(settings.cache.ttl_seconds);
    let cache: Arc<dyn PreferenceCache> = match RedisPreferenceCache::new(
        &settings.cache.url,
        breaker_registry.get("preference-cache"),
        cache_ttl,
    ) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::warn!(error = %e, "redis preference cache unavailable, falling back to in-process cache");
            Arc::new(InMemoryPreferenceCache::new())
        }
    };

    let user_service = UserServiceClient::new(
        settings.services.user_service_url.clone(),
        http.clone(),
        breaker_registry.get("user-service"),
        cache,
        cache_ttl,
    );
    let template_service = TemplateServiceClient::new(
        settings.services.template_service_url.clone(),
        http.clone(),
        breaker_registry.get("template-service"),
    );
    let gateway = Arc::new(GatewayClient::new(
        settings.services.gateway_url.clone(),
        http.clone(),
        breaker_registry.get("gateway"),
    ));

    let provider = notify_fabric::providers::ProviderFactory::build(&settings.provider, http.clone())
        .context("failed to build provider from configuration")?;
    tracing::info!(provider = provider.name(), "provider configured");

    let retry_policy = RetryPolicy::new(
        settings.retry.max_attempts,
        Duration::from_millis(settings.retry.min_wait_ms),
        Duration::from_millis(settings.retry.max_wait_ms),
        settings.retry.multiplier,
    );

    let repository = DeliveryRepository::new(db_pool.clone());
    let provider_breaker = breaker_registry.get(provider_breaker_name(channel));

    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        channel,
        repository,
        user_service,
        template_service,
        gateway.clone(),
        provider,
        provider_breaker,
        retry_policy,
    ));

    let app_state = AppState::new(settings.clone(), db_pool, gateway, breaker_registry);
    let app = create_app(app_state);

    let shutdown = Shutdown::new(ShutdownConfig::default());
    let grace_period = shutdown.grace_period();

    let consumer = QueueConsumer::new(
        settings.broker.clone(),
        orchestrator,
        settings.broker.prefetch_count as usize,
    );
    let consumer_shutdown = shutdown.subscribe();
    let consumer_handle = tokio::spawn(async move { consumer.run(consumer_shutdown).await });

    let addr: SocketAddr = settings
        .server_addr()
        .parse()
        .context("invalid server bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind HTTP listener")?;
    tracing::info!(%addr, "HTTP surface listening (webhooks, health, stats, metrics)");

    let mut server_shutdown = shutdown.subscribe();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    tokio::select! {
        _ = shutdown.listen() => {
            tracing::info!("shutdown requested");
        }
        result = wait_for_consumer(consumer_handle) => {
            tracing::error!(?result, "queue consumer exited unexpectedly, shutting down");
            return result;
        }
    }

    let drained = with_grace_period(grace_period, async {
        let _ = server_handle.await;
    })
    .await;
    if !drained {
        tracing::warn!("HTTP server did not shut down within the grace period");
    }

    tracing::info!("worker shutdown complete");
    Ok(())
}

/// Wraps the consumer task so a panic or a connection-retry exhaustion
/// surfaces as a normal `Result` the `select!` above can race against the
/// shutdown signal.
async fn wait_for_consumer(handle: tokio::task::JoinHandle<Result<(), notify_fabric::error::AppError>>) -> Result<()> {
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow::anyhow!("queue consumer task panicked: {e}")),
    }
}

fn provider_breaker_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email-provider",
        Channel::Push => "push-provider",
    }
}
