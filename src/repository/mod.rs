//! Delivery repository: the one place that touches the `deliveries` table.
//! Every status write goes through [`crate::domain::transition`] first so an
//! invalid edge never reaches storage.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{transition, DeliveryRecord, DeliveryStatus};
use crate::error::ErrorCode;

#[derive(Clone)]
pub struct DeliveryRepository {
    pool: PgPool,
}

/// A new delivery about to be persisted, before it has a row id.
pub struct NewDelivery<'a> {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: &'a str,
    pub address: &'a str,
    pub subject: Option<&'a str>,
    pub body_html: Option<&'a str>,
    pub body_text: Option<&'a str>,
    pub max_attempts: i32,
    pub extra_data: Option<Value>,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent insert for at-least-once queue delivery: a duplicate
    /// `(notification_id, channel)` is a no-op, and the caller gets back
    /// whichever row already exists rather than a constraint error.
    pub async fn upsert_pending(&self, new: NewDelivery<'_>) -> Result<DeliveryRecord, sqlx::Error> {
        let inserted: Option<DeliveryRecord> = sqlx::query_as(
            r#"
            INSERT INTO deliveries (
                id, notification_id, user_id, channel, address,
                subject, body_html, body_text, status,
                attempt_count, max_attempts, extra_data, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 0, $9, $10, NOW(), NOW())
            ON CONFLICT (notification_id, channel) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.notification_id)
        .bind(new.user_id)
        .bind(new.channel)
        .bind(new.address)
        .bind(new.subject)
        .bind(new.body_html)
        .bind(new.body_text)
        .bind(new.max_attempts)
        .bind(new.extra_data)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(record) => Ok(record),
            None => self
                .get_by_notification_and_channel(new.notification_id, new.channel)
                .await?
                .ok_or(sqlx::Error::RowNotFound),
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<DeliveryRecord>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_notification_and_channel(
        &self,
        notification_id: Uuid,
        channel: &str,
    ) -> Result<Option<DeliveryRecord>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM deliveries WHERE notification_id = $1 AND channel = $2")
            .bind(notification_id)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryRecord>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM deliveries WHERE provider_message_id = $1")
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Delivery counts grouped by channel and status, for the `/stats` surface.
    pub async fn status_counts(&self) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as(
            "SELECT channel, status, COUNT(*) AS count FROM deliveries GROUP BY channel, status",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn increment_attempt(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deliveries SET attempt_count = attempt_count + 1, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Moves a delivery to `to`, guarded both in-process (via
    /// [`transition`]) and at the database (the `WHERE status = $current`
    /// clause) so a concurrent webhook and orchestrator write can't race each
    /// other into an invalid state. Returns `Ok(false)` rather than erroring
    /// when the guard loses the race — that's a legitimate no-op, not a bug.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_status(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
        provider: Option<&str>,
        provider_message_id: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> Result<bool, UpdateStatusError> {
        transition(from, to).map_err(UpdateStatusError::InvalidTransition)?;

        let now = Utc::now();
        let sent_at = matches!(to, DeliveryStatus::Sent).then_some(now);
        let delivered_at = matches!(to, DeliveryStatus::Delivered).then_some(now);
        let failed_at = matches!(to, DeliveryStatus::Failed | DeliveryStatus::Bounced).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = $1,
                updated_at = NOW(),
                provider = COALESCE($2, provider),
                provider_message_id = COALESCE($3, provider_message_id),
                error_code = COALESCE($4, error_code),
                error_message = COALESCE($5, error_message),
                sent_at = COALESCE($6, sent_at),
                delivered_at = COALESCE($7, delivered_at),
                failed_at = COALESCE($8, failed_at)
            WHERE id = $9 AND status = $10
            "#,
        )
        .bind(to)
        .bind(provider)
        .bind(provider_message_id)
        .bind(error_code)
        .bind(error_message)
        .bind(sent_at)
        .bind(delivered_at)
        .bind(failed_at)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await
        .map_err(UpdateStatusError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct StatusCount {
    pub channel: String,
    pub status: DeliveryStatus,
    pub count: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateStatusError {
    #[error(transparent)]
    InvalidTransition(#[from] crate::domain::InvalidTransition),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}
