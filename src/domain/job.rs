//! The queue message shape: the payload dequeued from the broker, one job per
//! notification. Which channel handles it is decided by which queue it arrived
//! on (`email.queue` vs `push.queue`), not by a field on the job itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl From<crate::config::ChannelKind> for Channel {
    fn from(kind: crate::config::ChannelKind) -> Self {
        match kind {
            crate::config::ChannelKind::Email => Channel::Email,
            crate::config::ChannelKind::Push => Channel::Push,
        }
    }
}

fn default_priority() -> i32 {
    0
}

/// Deserialized straight off the broker payload. `variables` and `metadata` are
/// opaque to this service — they're handed to the template service (and stored
/// alongside the delivery record) as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub template_code: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl DeliveryJob {
    /// Which template reference to hand the template service: an id when
    /// present, otherwise the code. `validate` guarantees at least one exists.
    pub fn template_reference(&self) -> TemplateReference<'_> {
        match (&self.template_id, &self.template_code) {
            (Some(id), _) => TemplateReference::Id(*id),
            (None, Some(code)) => TemplateReference::Code(code.as_str()),
            (None, None) => unreachable!("validate() rejects jobs with neither"),
        }
    }

    /// Rejects a job whose required identifiers are missing or malformed —
    /// such a job can never be delivered and is dead-lettered rather than
    /// retried.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.notification_id.is_nil() {
            return Err(AppError::Validation("notification_id is nil".to_string()));
        }
        if self.user_id.is_nil() {
            return Err(AppError::Validation("user_id is nil".to_string()));
        }
        let template_id_present = self.template_id.is_some_and(|id| !id.is_nil());
        let template_code_present = self
            .template_code
            .as_ref()
            .is_some_and(|c| !c.trim().is_empty());
        if !template_id_present && !template_code_present {
            return Err(AppError::Validation(
                "neither template_id nor template_code is present".to_string(),
            ));
        }
        Ok(())
    }

    pub fn error_code_for_invalid(&self) -> ErrorCode {
        ErrorCode::InvalidJob
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TemplateReference<'a> {
    Id(Uuid),
    Code(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_job() -> DeliveryJob {
        DeliveryJob {
            notification_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            template_id: Some(Uuid::new_v4()),
            template_code: None,
            variables: json!({"name": "Ada"}),
            priority: 0,
            request_id: "req-1".to_string(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    #[test]
    fn test_validate_accepts_template_id() {
        assert!(valid_job().validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_template_code_without_id() {
        let mut job = valid_job();
        job.template_id = None;
        job.template_code = Some("welcome".to_string());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_template_reference() {
        let mut job = valid_job();
        job.template_id = None;
        job.template_code = None;
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_template_code() {
        let mut job = valid_job();
        job.template_id = None;
        job.template_code = Some("   ".to_string());
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nil_ids() {
        let mut job = valid_job();
        job.notification_id = Uuid::nil();
        assert!(job.validate().is_err());

        let mut job = valid_job();
        job.user_id = Uuid::nil();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_template_reference_prefers_id() {
        let job = valid_job();
        match job.template_reference() {
            TemplateReference::Id(id) => assert_eq!(Some(id), job.template_id),
            TemplateReference::Code(_) => panic!("expected id reference"),
        }
    }

    #[test]
    fn test_job_deserializes_from_json() {
        let raw = json!({
            "notification_id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "template_code": "reminder",
            "variables": {},
            "request_id": "req-42",
            "created_at": Utc::now(),
        });
        let job: DeliveryJob = serde_json::from_value(raw).unwrap();
        assert_eq!(job.priority, 0);
        assert!(job.template_id.is_none());
        assert_eq!(job.template_code.as_deref(), Some("reminder"));
    }

    #[test]
    fn test_job_round_trips_through_json() {
        let job = valid_job();
        let raw = serde_json::to_string(&job).unwrap();
        let back: DeliveryJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.notification_id, job.notification_id);
        assert_eq!(back.user_id, job.user_id);
        assert_eq!(back.template_id, job.template_id);
        assert_eq!(back.request_id, job.request_id);
    }
}
