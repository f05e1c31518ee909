//! Prometheus metrics for the delivery workers, exposed at `/metrics`.
//!
//! - Delivery counts by channel/status
//! - Circuit breaker state per dependency
//! - Queue consumer throughput (ack/nack/requeue, prefetch depth)
//! - Provider send latency and outbound HTTP/SMTP errors
//! - Webhook batch ingestion counters

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};

const METRIC_PREFIX: &str = "notifyfabric";

lazy_static! {
    // ------------------------------------------------------------------
    // Delivery metrics
    // ------------------------------------------------------------------

    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total delivery attempts by channel and resulting status",
        &["channel", "status"]
    ).unwrap();

    pub static ref DELIVERY_ATTEMPTS: HistogramVec = register_histogram_vec!(
        format!("{}_delivery_attempts", METRIC_PREFIX),
        "Number of send attempts consumed per delivery",
        &["channel"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0]
    ).unwrap();

    pub static ref DELIVERY_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "End-to-end time from job receipt to a terminal or sent state",
        &["channel"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref DELIVERIES_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_skipped_total", METRIC_PREFIX),
        "Deliveries skipped due to user preference opt-out",
        &["channel"]
    ).unwrap();

    // ------------------------------------------------------------------
    // Circuit breaker metrics
    // ------------------------------------------------------------------

    pub static ref BREAKER_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_breaker_state", METRIC_PREFIX),
        "Circuit breaker state per dependency (0=closed, 1=open, 2=half-open)",
        &["dependency"]
    ).unwrap();

    pub static ref BREAKER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_breaker_failures_total", METRIC_PREFIX),
        "Total recorded failures per dependency breaker",
        &["dependency"]
    ).unwrap();

    // ------------------------------------------------------------------
    // Queue consumer metrics
    // ------------------------------------------------------------------

    pub static ref QUEUE_MESSAGES_CONSUMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_messages_consumed_total", METRIC_PREFIX),
        "Total messages consumed from the broker"
    ).unwrap();

    pub static ref QUEUE_MESSAGES_ACKED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_messages_acked_total", METRIC_PREFIX),
        "Total messages acknowledged"
    ).unwrap();

    pub static ref QUEUE_MESSAGES_REQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_messages_requeued_total", METRIC_PREFIX),
        "Total messages rejected and requeued"
    ).unwrap();

    pub static ref QUEUE_MESSAGES_DEAD_LETTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_messages_dead_lettered_total", METRIC_PREFIX),
        "Total messages rejected without requeue (routed to the dead-letter queue)"
    ).unwrap();

    pub static ref QUEUE_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_queue_in_flight", METRIC_PREFIX),
        "Messages currently checked out of the broker and being processed"
    ).unwrap();

    pub static ref BROKER_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_broker_connection_status", METRIC_PREFIX),
        "Broker connection status (1=connected, 0=disconnected)"
    ).unwrap();

    pub static ref BROKER_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_reconnects_total", METRIC_PREFIX),
        "Total broker reconnection attempts"
    ).unwrap();

    // ------------------------------------------------------------------
    // Provider metrics
    // ------------------------------------------------------------------

    pub static ref PROVIDER_SEND_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        format!("{}_provider_send_latency_seconds", METRIC_PREFIX),
        "Latency of a single provider send call",
        &["provider"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]
    ).unwrap();

    pub static ref PROVIDER_SEND_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_provider_send_errors_total", METRIC_PREFIX),
        "Total provider send errors",
        &["provider"]
    ).unwrap();

    // ------------------------------------------------------------------
    // Webhook metrics
    // ------------------------------------------------------------------

    pub static ref WEBHOOK_EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_webhook_events_received_total", METRIC_PREFIX),
        "Total webhook events received, by channel",
        &["channel"]
    ).unwrap();

    pub static ref WEBHOOK_EVENTS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_webhook_events_processed_total", METRIC_PREFIX),
        "Total webhook events successfully applied to a delivery record",
        &["channel"]
    ).unwrap();

    // ------------------------------------------------------------------
    // Dependency health
    // ------------------------------------------------------------------

    pub static ref DATABASE_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_database_connection_status", METRIC_PREFIX),
        "Database connection status (1=connected, 0=disconnected)"
    ).unwrap();

    pub static ref CACHE_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_cache_connection_status", METRIC_PREFIX),
        "Preference cache connection status (1=connected, 0=disconnected)"
    ).unwrap();
}

pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Mirrors every registered breaker's state/failure-count into the gauge/counter
/// pair above. Called on a timer and from the `/metrics` handler itself.
pub fn record_breaker_snapshot(snapshot: &[crate::resilience::breaker::CircuitBreakerStats]) {
    for stats in snapshot {
        BREAKER_STATE
            .with_label_values(&[stats.name.as_str()])
            .set(stats.state as i64);
    }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record(channel: &str, status: &str) {
        DELIVERIES_TOTAL.with_label_values(&[channel, status]).inc();
    }

    pub fn record_skipped(channel: &str) {
        DELIVERIES_SKIPPED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_attempts(channel: &str, attempts: u32) {
        DELIVERY_ATTEMPTS
            .with_label_values(&[channel])
            .observe(attempts as f64);
    }
}
