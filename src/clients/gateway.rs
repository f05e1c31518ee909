//! Client for the out-of-scope notification gateway: reports delivery status
//! changes upstream so the caller who submitted the notification can see where
//! it ended up. Best-effort — a failed report never undoes a persisted
//! delivery status change, it's just logged and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::DeliveryStatus;
use crate::resilience::CircuitBreaker;

/// The gateway's own status vocabulary is coarser than ours: it only ever
/// sees whether a notification is still pending, was delivered, or failed.
/// `sent`/`delivered` both report as `delivered`; `bounced`/`failed` both
/// report as `failed`; `pending`/`skipped` both report as `pending`.
fn external_status(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Sent | DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Failed | DeliveryStatus::Bounced => "failed",
        DeliveryStatus::Pending | DeliveryStatus::Skipped => "pending",
    }
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    notification_id: Uuid,
    channel: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_message_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    /// When the provider accepted the message for transport — distinct from
    /// `delivered_at`, which only a later webhook can supply.
    #[serde(skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivered_at: Option<DateTime<Utc>>,
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            breaker,
        }
    }

    /// Reports a status change. Never returns an error the caller needs to act
    /// on — logs and returns on any failure, including a tripped breaker.
    #[allow(clippy::too_many_arguments)]
    pub async fn report_status(
        &self,
        notification_id: Uuid,
        channel: &str,
        status: DeliveryStatus,
        provider_message_id: Option<&str>,
        error_message: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    ) {
        if !self.breaker.allow_request() {
            tracing::debug!(%notification_id, channel, "gateway breaker open, skipping status report");
            return;
        }

        let report = StatusReport {
            notification_id,
            channel,
            status: external_status(status),
            provider_message_id,
            error_message,
            sent_at,
            delivered_at,
        };

        let url = format!("{}/internal/notifications/{}", self.base_url, notification_id);
        match self.http.patch(&url).json(&report).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.breaker.record_success();
            }
            Ok(resp) if resp.status().is_server_error() => {
                self.breaker.record_failure();
                tracing::warn!(%notification_id, status = %resp.status(), "gateway status report failed");
            }
            Ok(resp) => {
                self.breaker.record_success();
                tracing::warn!(%notification_id, status = %resp.status(), "gateway rejected status report");
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(%notification_id, error = %e, "gateway status report request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_status_mapping_collapses_onto_three_values() {
        assert_eq!(external_status(DeliveryStatus::Sent), "delivered");
        assert_eq!(external_status(DeliveryStatus::Delivered), "delivered");
        assert_eq!(external_status(DeliveryStatus::Failed), "failed");
        assert_eq!(external_status(DeliveryStatus::Bounced), "failed");
        assert_eq!(external_status(DeliveryStatus::Pending), "pending");
        assert_eq!(external_status(DeliveryStatus::Skipped), "pending");

        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Bounced,
            DeliveryStatus::Failed,
            DeliveryStatus::Skipped,
        ] {
            assert!(matches!(external_status(status), "delivered" | "failed" | "pending"));
        }
    }

    #[test]
    fn test_delivered_and_sent_are_distinct_fields() {
        let now = Utc::now();
        let report = StatusReport {
            notification_id: Uuid::new_v4(),
            channel: "email",
            status: "delivered",
            provider_message_id: None,
            error_message: None,
            sent_at: Some(now),
            delivered_at: Some(now),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("sent_at").is_some());
        assert!(json.get("delivered_at").is_some());
    }
}
