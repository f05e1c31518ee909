//! The seam between the queue consumer and the delivery orchestrator. The
//! orchestrator never raises past this boundary — every pipeline run
//! collapses to one of three outcomes the consumer knows how to ack/nack.

use crate::error::ErrorCode;

/// What the consumer should do with the broker message once a pipeline run
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Commit succeeded (or the job was a legitimate terminal no-op such as
    /// `skipped`/`failed`-with-ack). Acknowledge the message.
    Ack,
    /// A retryable condition outside the bounded send-retry (DB hiccup, cache
    /// error that still let the call through, an unexpected panic caught at
    /// the task boundary). Nack with requeue.
    TransientFailure,
    /// A condition the broker redelivering will never fix (malformed job,
    /// channel mismatch). Nack without requeue — straight to the DLQ.
    PermanentFailure,
}

/// Internal pipeline errors, never serialized to an HTTP client — the
/// orchestrator maps every variant to a [`HandlerOutcome`] before returning.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job failed validation: {0}")]
    InvalidJob(String),
    #[error("no address on file for channel")]
    NoAddress,
    #[error("template render failed: {0}")]
    RenderFailed(String),
    #[error("provider send exhausted retries: {0}")]
    SendExhausted(String),
    #[error("provider circuit breaker open")]
    ProviderUnavailable,
    #[error("delivery repository error: {0}")]
    Repository(#[from] sqlx::Error),
}

impl OrchestratorError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            OrchestratorError::InvalidJob(_) => ErrorCode::InvalidJob,
            OrchestratorError::NoAddress => ErrorCode::NoAddress,
            OrchestratorError::RenderFailed(_) => ErrorCode::RenderFailed,
            OrchestratorError::SendExhausted(_) => ErrorCode::SendFailed,
            OrchestratorError::ProviderUnavailable => ErrorCode::ProviderUnavailable,
            OrchestratorError::Repository(_) => ErrorCode::SendFailed,
        }
    }

    /// A repository error is the only orchestrator-internal failure worth
    /// retrying via requeue. A job that fails validation can never succeed on
    /// redelivery, so it dead-letters rather than acks. Everything else is a
    /// terminal, already-persisted delivery outcome that the consumer should
    /// simply ack.
    pub fn handler_outcome(&self) -> HandlerOutcome {
        match self {
            OrchestratorError::Repository(_) => HandlerOutcome::TransientFailure,
            OrchestratorError::InvalidJob(_) => HandlerOutcome::PermanentFailure,
            _ => HandlerOutcome::Ack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_is_transient() {
        let err = OrchestratorError::Repository(sqlx::Error::RowNotFound);
        assert_eq!(err.handler_outcome(), HandlerOutcome::TransientFailure);
    }

    #[test]
    fn test_terminal_errors_ack() {
        assert_eq!(
            OrchestratorError::NoAddress.handler_outcome(),
            HandlerOutcome::Ack
        );
        assert_eq!(
            OrchestratorError::ProviderUnavailable.handler_outcome(),
            HandlerOutcome::Ack
        );
    }

    #[test]
    fn test_invalid_job_dead_letters_instead_of_acking() {
        let err = OrchestratorError::InvalidJob("missing notification_id".into());
        assert_eq!(err.handler_outcome(), HandlerOutcome::PermanentFailure);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(OrchestratorError::NoAddress.error_code(), ErrorCode::NoAddress);
        assert_eq!(
            OrchestratorError::RenderFailed("x".into()).error_code(),
            ErrorCode::RenderFailed
        );
        assert_eq!(
            OrchestratorError::ProviderUnavailable.error_code(),
            ErrorCode::ProviderUnavailable
        );
    }
}
