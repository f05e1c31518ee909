//! The delivery state machine and its relational record.
//!
//! ```text
//!            +-------+
//!            |pending|
//!            +-------+
//!             |  |  |
//!        sent |  |  | skipped
//!             v  |  v
//!         +----+ | +-------+
//!         |sent| | |skipped|  (terminal)
//!         +----+ | +-------+
//!          |  |  |
//! delivered|  |  | failed
//!          v  |  v
//!   +---------+ +------+
//!   |delivered| |failed|  (terminal)
//!   +---------+ +------+
//!          |
//!  bounced |
//!          v
//!     +-------+
//!     |bounced|  (terminal)
//!     +-------+
//! ```
//! `delivered`, `bounced`, `failed`, and `skipped` are terminal: once reached, no
//! further transition is valid, matching the no-op expectation for duplicate or
//! late webhook deliveries. One non-obvious edge: `sent -> pending` is allowed
//! too, for a provider "deferred" webhook — the delivery isn't terminal yet and
//! may still transition to `delivered`/`bounced`/`failed` later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Bounced,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Bounced
                | DeliveryStatus::Failed
                | DeliveryStatus::Skipped
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid delivery status transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
}

/// Validates one edge of the state machine without touching storage. The
/// orchestrator and the webhook handler both call this before persisting a
/// status change, so an invalid transition never reaches the database.
pub fn transition(from: DeliveryStatus, to: DeliveryStatus) -> Result<(), InvalidTransition> {
    use DeliveryStatus::*;

    let allowed = matches!(
        (from, to),
        (Pending, Sent) | (Pending, Failed) | (Pending, Skipped) |
        (Sent, Delivered) | (Sent, Bounced) | (Sent, Failed) | (Sent, Pending)
    );

    if allowed {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// One row per `(notification_id, channel)`. `body_text`/`body_html` carry the
/// push `title`/`body` pair too — same slots, channel-dependent meaning.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: String,
    pub address: String,
    pub subject: Option<String>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub status: DeliveryStatus,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}
