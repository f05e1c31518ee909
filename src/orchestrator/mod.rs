//! The delivery orchestrator: resolves preferences, renders content, sends
//! through the provider with bounded retry and a breaker, and persists every
//! step. One instance per process, built around whichever `Provider` this
//! channel's worker was configured with.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{GatewayClient, PreferenceLookup, RenderedContent, TemplateServiceClient, UserServiceClient};
use crate::domain::{Channel, DeliveryJob, DeliveryStatus};
use crate::error::ErrorCode;
use crate::metrics::{DeliveryMetrics, PROVIDER_SEND_ERRORS_TOTAL, PROVIDER_SEND_LATENCY_SECONDS};
use crate::pipeline::{HandlerOutcome, OrchestratorError};
use crate::providers::{Message as ProviderMessage, Provider, ProviderError};
use crate::repository::{DeliveryRepository, NewDelivery};
use crate::resilience::{CircuitBreaker, RetryPolicy};

pub struct DeliveryOrchestrator {
    channel: Channel,
    repository: DeliveryRepository,
    user_service: UserServiceClient,
    template_service: TemplateServiceClient,
    gateway: Arc<GatewayClient>,
    provider: Box<dyn Provider>,
    provider_breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    max_attempts: i32,
}

#[allow(clippy::too_many_arguments)]
impl DeliveryOrchestrator {
    pub fn new(
        channel: Channel,
        repository: DeliveryRepository,
        user_service: UserServiceClient,
        template_service: TemplateServiceClient,
        gateway: Arc<GatewayClient>,
        provider: Box<dyn Provider>,
        provider_breaker: Arc<CircuitBreaker>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let max_attempts = retry_policy.total_attempts() as i32;
        Self {
            channel,
            repository,
            user_service,
            template_service,
            gateway,
            provider,
            provider_breaker,
            retry_policy,
            max_attempts,
        }
    }

    /// Runs one job to completion. Never raises past this boundary (per the
    /// pipeline's contract) — every outcome, including an internal failure,
    /// resolves to a [`HandlerOutcome`] the caller acks or nacks by.
    pub async fn handle(&self, job: DeliveryJob) -> HandlerOutcome {
        match self.run(&job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    notification_id = %job.notification_id,
                    channel = self.channel.as_str(),
                    error = %err,
                    "delivery pipeline error"
                );
                err.handler_outcome()
            }
        }
    }

    async fn run(&self, job: &DeliveryJob) -> Result<HandlerOutcome, OrchestratorError> {
        job.validate()
            .map_err(|e| OrchestratorError::InvalidJob(e.to_string()))?;

        let lookup = self.user_service.resolve(job.user_id, self.channel).await;

        let preferences = match lookup {
            PreferenceLookup::Found(snapshot) => snapshot,
            PreferenceLookup::NotFound => {
                info!(notification_id = %job.notification_id, "user preferences not found, failing delivery");
                self.persist_failure(job, None, ErrorCode::UserNotFound, "user preferences not found")
                    .await?;
                return Ok(HandlerOutcome::Ack);
            }
            PreferenceLookup::Unavailable => {
                // Conservative default: try to deliver rather than silently drop,
                // matching the user-service-unreachable fallback.
                crate::domain::UserPreferenceSnapshot {
                    user_id: job.user_id,
                    email_enabled: true,
                    push_enabled: true,
                    email_address: None,
                    push_token: None,
                }
            }
        };

        if !preferences.channel_enabled(self.channel) {
            info!(notification_id = %job.notification_id, "channel disabled for user, skipping");
            self.persist_skip(job, "channel disabled for user").await?;
            return Ok(HandlerOutcome::Ack);
        }

        let address = match preferences.address_for(self.channel) {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ => {
                self.persist_failure(job, None, ErrorCode::NoAddress, "no address on file for channel")
                    .await?;
                return Ok(HandlerOutcome::Ack);
            }
        };

        let rendered = match self
            .template_service
            .render(job.template_reference(), self.channel, &job.variables)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                self.persist_failure(job, Some(&address), ErrorCode::RenderFailed, &e.to_string())
                    .await?;
                return Ok(HandlerOutcome::Ack);
            }
        };

        let record = self.persist_pending(job, &address, &rendered).await?;

        if record.status != DeliveryStatus::Pending {
            // A redelivered message for a notification this process already
            // finished (crash after send, before ack) — the upsert returned
            // the existing terminal row rather than a fresh one.
            info!(notification_id = %job.notification_id, status = ?record.status, "delivery already processed, acking duplicate");
            return Ok(HandlerOutcome::Ack);
        }

        if !self.provider_breaker.allow_request() {
            self.repository
                .update_status(
                    record.id,
                    DeliveryStatus::Pending,
                    DeliveryStatus::Failed,
                    Some(self.provider.name()),
                    None,
                    Some(ErrorCode::ProviderUnavailable),
                    Some("provider circuit breaker open"),
                )
                .await
                .map_err(|e| OrchestratorError::Repository(sqlx_error(e)))?;
            self.gateway
                .report_status(
                    job.notification_id,
                    self.channel.as_str(),
                    DeliveryStatus::Failed,
                    None,
                    Some("provider circuit breaker open"),
                    None,
                    None,
                )
                .await;
            return Err(OrchestratorError::ProviderUnavailable);
        }

        self.send_with_retry(job, &record.id, &address, &rendered).await
    }

    async fn send_with_retry(
        &self,
        job: &DeliveryJob,
        delivery_id: &Uuid,
        address: &str,
        content: &RenderedContent,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        loop {
            attempt += 1;
            self.repository
                .increment_attempt(*delivery_id)
                .await
                .map_err(OrchestratorError::Repository)?;

            let started = std::time::Instant::now();
            let send_result = self
                .provider
                .send(ProviderMessage {
                    address,
                    content,
                })
                .await;
            PROVIDER_SEND_LATENCY_SECONDS
                .with_label_values(&[self.provider.name()])
                .observe(started.elapsed().as_secs_f64());

            match send_result {
                Ok(receipt) => {
                    self.provider_breaker.record_success();
                    self.repository
                        .update_status(
                            *delivery_id,
                            DeliveryStatus::Pending,
                            DeliveryStatus::Sent,
                            Some(self.provider.name()),
                            receipt.provider_message_id.as_deref(),
                            None,
                            None,
                        )
                        .await
                        .map_err(|e| OrchestratorError::Repository(sqlx_error(e)))?;

                    self.gateway
                        .report_status(
                            job.notification_id,
                            self.channel.as_str(),
                            DeliveryStatus::Sent,
                            receipt.provider_message_id.as_deref(),
                            None,
                            Some(chrono::Utc::now()),
                            None,
                        )
                        .await;

                    DeliveryMetrics::record(self.channel.as_str(), "sent");
                    DeliveryMetrics::record_attempts(self.channel.as_str(), attempt);
                    return Ok(HandlerOutcome::Ack);
                }
                Err(e) => {
                    let retryable = matches!(e, ProviderError::Transport(_));
                    last_error = e.to_string();
                    self.provider_breaker.record_failure();
                    PROVIDER_SEND_ERRORS_TOTAL
                        .with_label_values(&[self.provider.name()])
                        .inc();

                    // Rejected means a non-retryable outcome (4xx other than
                    // 408/429, malformed recipient, ...): stop at the first
                    // attempt rather than burning the retry budget on
                    // something that will never succeed.
                    if !retryable || !self.retry_policy.should_retry(attempt) {
                        break;
                    }

                    tokio::time::sleep(self.retry_policy.delay_for(attempt)).await;
                }
            }
        }

        self.repository
            .update_status(
                *delivery_id,
                DeliveryStatus::Pending,
                DeliveryStatus::Failed,
                Some(self.provider.name()),
                None,
                Some(ErrorCode::SendFailed),
                Some(&last_error),
            )
            .await
            .map_err(|e| OrchestratorError::Repository(sqlx_error(e)))?;

        self.gateway
            .report_status(
                job.notification_id,
                self.channel.as_str(),
                DeliveryStatus::Failed,
                None,
                Some(&last_error),
                None,
                None,
            )
            .await;

        DeliveryMetrics::record(self.channel.as_str(), "failed");
        DeliveryMetrics::record_attempts(self.channel.as_str(), attempt);
        Ok(HandlerOutcome::Ack)
    }

    async fn persist_pending(
        &self,
        job: &DeliveryJob,
        address: &str,
        rendered: &RenderedContent,
    ) -> Result<crate::domain::DeliveryRecord, OrchestratorError> {
        let (subject, body_html, body_text) = match rendered {
            RenderedContent::Email {
                subject,
                body_html,
                body_text,
            } => (Some(subject.as_str()), body_html.as_deref(), body_text.as_deref()),
            RenderedContent::Push { title, body } => (Some(title.as_str()), None, Some(body.as_str())),
        };

        self.repository
            .upsert_pending(NewDelivery {
                notification_id: job.notification_id,
                user_id: job.user_id,
                channel: self.channel.as_str(),
                address,
                subject,
                body_html,
                body_text,
                max_attempts: self.max_attempts,
                extra_data: job.metadata.clone(),
            })
            .await
            .map_err(OrchestratorError::Repository)
    }

    async fn persist_skip(&self, job: &DeliveryJob, reason: &str) -> Result<(), OrchestratorError> {
        let record = self
            .repository
            .upsert_pending(NewDelivery {
                notification_id: job.notification_id,
                user_id: job.user_id,
                channel: self.channel.as_str(),
                address: "",
                subject: None,
                body_html: None,
                body_text: None,
                max_attempts: self.max_attempts,
                extra_data: job.metadata.clone(),
            })
            .await
            .map_err(OrchestratorError::Repository)?;

        if record.status == DeliveryStatus::Pending {
            self.repository
                .update_status(
                    record.id,
                    DeliveryStatus::Pending,
                    DeliveryStatus::Skipped,
                    None,
                    None,
                    None,
                    Some(reason),
                )
                .await
                .map_err(|e| OrchestratorError::Repository(sqlx_error(e)))?;
        }

        self.gateway
            .report_status(
                job.notification_id,
                self.channel.as_str(),
                DeliveryStatus::Skipped,
                None,
                Some(reason),
                None,
                None,
            )
            .await;

        DeliveryMetrics::record_skipped(self.channel.as_str());
        Ok(())
    }

    async fn persist_failure(
        &self,
        job: &DeliveryJob,
        address: Option<&str>,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), OrchestratorError> {
        let record = self
            .repository
            .upsert_pending(NewDelivery {
                notification_id: job.notification_id,
                user_id: job.user_id,
                channel: self.channel.as_str(),
                address: address.unwrap_or(""),
                subject: None,
                body_html: None,
                body_text: None,
                max_attempts: self.max_attempts,
                extra_data: job.metadata.clone(),
            })
            .await
            .map_err(OrchestratorError::Repository)?;

        if record.status == DeliveryStatus::Pending {
            self.repository
                .update_status(
                    record.id,
                    DeliveryStatus::Pending,
                    DeliveryStatus::Failed,
                    None,
                    None,
                    Some(code),
                    Some(message),
                )
                .await
                .map_err(|e| OrchestratorError::Repository(sqlx_error(e)))?;
        }

        self.gateway
            .report_status(
                job.notification_id,
                self.channel.as_str(),
                DeliveryStatus::Failed,
                None,
                Some(message),
                None,
                None,
            )
            .await;

        DeliveryMetrics::record(self.channel.as_str(), "failed");
        Ok(())
    }
}

fn sqlx_error(e: crate::repository::UpdateStatusError) -> sqlx::Error {
    match e {
        crate::repository::UpdateStatusError::Database(err) => err,
        crate::repository::UpdateStatusError::InvalidTransition(_) => sqlx::Error::RowNotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_module_compiles() {
        // Full pipeline coverage lives in the crate's integration tests, which
        // spin up a real (disposable) Postgres schema and a recording provider.
        assert_eq!(Channel::Email.as_str(), "email");
    }
}
