//! End-to-end coverage of the seed scenarios in the specification: the
//! orchestrator pipeline (preferences -> render -> persist -> send ->
//! reconcile) against a real Postgres schema, a recording provider standing
//! in for the transport, and wiremock doubles for the user/template/gateway
//! services.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notify_fabric::clients::{GatewayClient, TemplateServiceClient, UserServiceClient};
use notify_fabric::domain::{Channel, DeliveryJob, DeliveryStatus};
use notify_fabric::orchestrator::DeliveryOrchestrator;
use notify_fabric::pipeline::HandlerOutcome;
use notify_fabric::providers::test_support::RecordingProvider;
use notify_fabric::repository::DeliveryRepository;
use notify_fabric::resilience::{CircuitBreaker, CircuitBreakerConfig, InMemoryPreferenceCache, RetryPolicy};

fn job(user_id: Uuid) -> DeliveryJob {
    serde_json::from_value(json!({
        "notification_id": Uuid::new_v4(),
        "user_id": user_id,
        "template_code": "welcome",
        "variables": {"name": "Ada"},
        "created_at": chrono::Utc::now().to_rfc3339(),
    }))
    .unwrap()
}

fn breaker(name: &'static str) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::with_config(
        name,
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
        },
    ))
}

/// Wires an orchestrator against live wiremock doubles and a given provider.
async fn build_orchestrator(
    pool: PgPool,
    user_service: &MockServer,
    template_service: &MockServer,
    gateway: &MockServer,
    provider: RecordingProvider,
) -> DeliveryOrchestrator {
    let http = reqwest::Client::new();

    let user_service_client = UserServiceClient::new(
        user_service.uri(),
        http.clone(),
        breaker("user-service"),
        Arc::new(InMemoryPreferenceCache::new()),
        Duration::from_secs(300),
    );
    let template_service_client =
        TemplateServiceClient::new(template_service.uri(), http.clone(), breaker("template-service"));
    let gateway_client = Arc::new(GatewayClient::new(gateway.uri(), http.clone(), breaker("gateway")));

    DeliveryOrchestrator::new(
        Channel::Email,
        DeliveryRepository::new(pool),
        user_service_client,
        template_service_client,
        gateway_client,
        Box::new(provider),
        breaker("email-provider"),
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0),
    )
}

async fn mock_preferences(server: &MockServer, email_enabled: bool, email: Option<&str>) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/users/.+/preferences$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "email_enabled": email_enabled,
                "push_enabled": true,
                "email": email,
            }
        })))
        .mount(server)
        .await;
}

async fn mock_render_email(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/templates/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "subject": "Hi Ada",
                "body_html": null,
                "body_text": "Hello Ada"
            }
        })))
        .mount(server)
        .await;
}

async fn mock_gateway_status(server: &MockServer) {
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[sqlx::test]
async fn happy_path_email_ends_sent_with_message_id(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    mock_preferences(&user_service, true, Some("ada@example.com")).await;
    mock_render_email(&template_service).await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new();
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;
    let outcome = orchestrator.handle(j).await;
    assert_eq!(outcome, HandlerOutcome::Ack);

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .expect("row should exist");

    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 1);
    assert!(record.provider_message_id.is_some());
}

#[sqlx::test]
async fn channel_disabled_ends_skipped(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    mock_preferences(&user_service, false, Some("ada@example.com")).await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new();
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;
    let outcome = orchestrator.handle(j).await;
    assert_eq!(outcome, HandlerOutcome::Ack);

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(record.status, DeliveryStatus::Skipped);
    assert_eq!(record.attempt_count, 0);
}

#[sqlx::test]
async fn missing_address_ends_failed_no_address(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    mock_preferences(&user_service, true, None).await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new();
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;
    orchestrator.handle(j).await;

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error_code, Some(notify_fabric::error::ErrorCode::NoAddress));
}

#[sqlx::test]
async fn user_not_found_ends_failed_no_db_skip(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/users/.+/preferences$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&user_service)
        .await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new();
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;
    let outcome = orchestrator.handle(j).await;
    assert_eq!(outcome, HandlerOutcome::Ack);

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .expect("row should exist even though preferences were never found");
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error_code, Some(notify_fabric::error::ErrorCode::UserNotFound));
}

#[sqlx::test]
async fn transient_failure_then_success_consumes_two_attempts(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    mock_preferences(&user_service, true, Some("ada@example.com")).await;
    mock_render_email(&template_service).await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new().fail_next_n(1);
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;
    let outcome = orchestrator.handle(j).await;
    assert_eq!(outcome, HandlerOutcome::Ack);

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 2);
}

#[sqlx::test]
async fn redelivered_job_is_idempotent(pool: PgPool) {
    let user_service = MockServer::start().await;
    let template_service = MockServer::start().await;
    let gateway = MockServer::start().await;

    mock_preferences(&user_service, true, Some("ada@example.com")).await;
    mock_render_email(&template_service).await;
    mock_gateway_status(&gateway).await;

    let provider = RecordingProvider::new();
    let orchestrator = build_orchestrator(pool.clone(), &user_service, &template_service, &gateway, provider).await;

    let j = job(Uuid::new_v4());
    let notification_id = j.notification_id;

    orchestrator.handle(j.clone()).await;
    let first = DeliveryRepository::new(pool.clone())
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .unwrap();

    // Redeliver the same message (broker at-least-once semantics).
    orchestrator.handle(j).await;

    let repository = DeliveryRepository::new(pool);
    let record = repository
        .get_by_notification_and_channel(notification_id, "email")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.id, first.id);
    assert_eq!(record.status, DeliveryStatus::Sent);
}

#[sqlx::test]
async fn webhook_delivered_event_reconciles_sent_row(pool: PgPool) {
    use axum::extract::{Path, State};
    use axum::Json;
    use notify_fabric::server::AppState;
    use notify_fabric::webhook::{handle_webhook, WebhookEvent};

    let gateway = MockServer::start().await;
    mock_gateway_status(&gateway).await;

    let http = reqwest::Client::new();
    let gateway_client = Arc::new(GatewayClient::new(gateway.uri(), http, breaker("gateway")));
    let breaker_registry = Arc::new(notify_fabric::resilience::BreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 5,
        open_timeout_ms: 60_000,
    }));

    let repository = DeliveryRepository::new(pool.clone());
    let notification_id = Uuid::new_v4();
    let record = repository
        .upsert_pending(notify_fabric::repository::NewDelivery {
            notification_id,
            user_id: Uuid::new_v4(),
            channel: "email",
            address: "ada@example.com",
            subject: Some("Hi Ada"),
            body_html: None,
            body_text: Some("hi"),
            max_attempts: 3,
            extra_data: None,
        })
        .await
        .unwrap();
    repository
        .update_status(
            record.id,
            DeliveryStatus::Pending,
            DeliveryStatus::Sent,
            Some("sendgrid-like"),
            Some("M5"),
            None,
            None,
        )
        .await
        .unwrap();

    let settings = test_settings();
    let state = AppState::new(settings, pool.clone(), gateway_client, breaker_registry);

    let result = handle_webhook(
        State(state),
        Path("email".to_string()),
        Json(vec![WebhookEvent {
            event: "delivered".to_string(),
            provider_message_id: "M5".to_string(),
            timestamp: None,
            reason: None,
        }]),
    )
    .await
    .unwrap();

    assert_eq!(result.0.received, 1);
    assert_eq!(result.0.processed, 1);

    let updated = repository.get_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(updated.status, DeliveryStatus::Delivered);
    assert!(updated.delivered_at.is_some());
}

#[sqlx::test]
async fn empty_webhook_batch_is_a_no_op(pool: PgPool) {
    use axum::extract::{Path, State};
    use axum::Json;
    use notify_fabric::server::AppState;
    use notify_fabric::webhook::handle_webhook;

    let gateway = MockServer::start().await;
    let http = reqwest::Client::new();
    let gateway_client = Arc::new(GatewayClient::new(gateway.uri(), http, breaker("gateway")));
    let breaker_registry = Arc::new(notify_fabric::resilience::BreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 5,
        open_timeout_ms: 60_000,
    }));

    let settings = test_settings();
    let state = AppState::new(settings, pool, gateway_client, breaker_registry);

    let result = handle_webhook(State(state), Path("email".to_string()), Json(vec![]))
        .await
        .unwrap();

    assert_eq!(result.0.received, 0);
    assert_eq!(result.0.processed, 0);
}

fn test_settings() -> Arc<notify_fabric::config::Settings> {
    Arc::new(notify_fabric::config::Settings {
        channel: notify_fabric::config::ChannelKind::Email,
        server: Default::default(),
        broker: notify_fabric::config::BrokerConfig {
            url: "amqp://localhost".to_string(),
            queue_name: "email.queue".to_string(),
            dlq_routing_key: "dead-letter".to_string(),
            prefetch_count: 10,
            reconnect_attempts: 5,
            reconnect_base_delay_ms: 5_000,
        },
        database: notify_fabric::config::DatabaseConfig {
            url: "postgres://localhost/test".to_string(),
            pool_size: 10,
            pool_overflow: 20,
            connect_timeout_seconds: 30,
        },
        cache: Default::default(),
        services: notify_fabric::config::ServicesConfig {
            user_service_url: "http://localhost".to_string(),
            template_service_url: "http://localhost".to_string(),
            gateway_url: "http://localhost".to_string(),
        },
        provider: notify_fabric::config::ProviderConfig {
            kind: notify_fabric::config::ProviderKindConfig::HttpEmailApi,
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            implicit_tls: false,
            http_api_url: Some("http://localhost".to_string()),
            http_api_key: None,
        },
        retry: Default::default(),
        breaker: Default::default(),
        otel: Default::default(),
        http_timeout_seconds: 30,
    })
}
