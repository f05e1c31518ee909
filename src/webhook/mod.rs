//! Inbound reconciliation path: applies asynchronous transport events (delivery,
//! bounce, drop, deferral) back onto a persisted [`DeliveryRecord`]. Independent
//! of the queue consumer — this is the only part of the worker the outside
//! world can call into directly.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::DeliveryStatus;
use crate::error::AppError;
use crate::metrics::{WEBHOOK_EVENTS_PROCESSED_TOTAL, WEBHOOK_EVENTS_RECEIVED_TOTAL};
use crate::server::AppState;

/// One transport event as the provider reports it. Extra provider-specific
/// fields ride along unexamined — only `event` and `provider_message_id` drive
/// reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub provider_message_id: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookBatchResult {
    pub received: usize,
    pub processed: usize,
}

/// Maps a provider event name to the status it reconciles a `sent` delivery
/// to. Anything outside this vocabulary is an unknown event, logged and
/// skipped rather than rejected — new provider event types shouldn't fail the
/// whole batch.
fn target_status(event: &str) -> Option<DeliveryStatus> {
    match event {
        "delivered" => Some(DeliveryStatus::Delivered),
        "bounce" | "bounced" => Some(DeliveryStatus::Bounced),
        "dropped" => Some(DeliveryStatus::Failed),
        "deferred" => Some(DeliveryStatus::Pending),
        _ => None,
    }
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(events): Json<Vec<WebhookEvent>>,
) -> Result<Json<WebhookBatchResult>, AppError> {
    WEBHOOK_EVENTS_RECEIVED_TOTAL
        .with_label_values(&[channel.as_str()])
        .inc_by(events.len() as u64);

    let mut processed = 0;
    for event in &events {
        if apply_event(&state, &channel, event).await {
            processed += 1;
        }
    }

    WEBHOOK_EVENTS_PROCESSED_TOTAL
        .with_label_values(&[channel.as_str()])
        .inc_by(processed as u64);

    Ok(Json(WebhookBatchResult {
        received: events.len(),
        processed,
    }))
}

/// Applies a single event. Never propagates an error out of the batch — a
/// stray or already-reconciled event is logged and counted as unprocessed,
/// not a reason to fail siblings in the same payload.
async fn apply_event(state: &AppState, channel: &str, event: &WebhookEvent) -> bool {
    if event.provider_message_id.is_empty() {
        tracing::warn!(channel, event = %event.event, "webhook event missing provider_message_id, skipping");
        return false;
    }

    let Some(to) = target_status(&event.event) else {
        tracing::warn!(channel, event = %event.event, "unrecognized webhook event, skipping");
        return false;
    };

    let record = match state
        .repository
        .get_by_provider_message_id(&event.provider_message_id)
        .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::info!(provider_message_id = %event.provider_message_id, "no delivery for webhook event, skipping");
            return false;
        }
        Err(e) => {
            tracing::error!(error = %e, "repository lookup failed while applying webhook event");
            return false;
        }
    };

    match state
        .repository
        .update_status(
            record.id,
            record.status,
            to,
            None,
            None,
            None,
            event.reason.as_deref(),
        )
        .await
    {
        Ok(true) => {
            state
                .gateway
                .report_status(
                    record.notification_id,
                    channel,
                    to,
                    record.provider_message_id.as_deref(),
                    event.reason.as_deref(),
                    record.sent_at,
                    matches!(to, DeliveryStatus::Delivered).then(chrono::Utc::now),
                )
                .await;
            true
        }
        Ok(false) => {
            tracing::debug!(
                delivery_id = %record.id,
                from = ?record.status,
                to = ?to,
                "webhook transition rejected, row already moved on"
            );
            false
        }
        Err(e) => {
            tracing::debug!(error = %e, "webhook event describes an invalid transition, dropping");
            false
        }
    }
}
