use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP surfaces (webhook ingress, health, stats, metrics).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var).
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => redact(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                e.to_string(),
                "Configuration error",
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Internal(msg) => redact(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                "Internal server error",
            ),
            AppError::Database(e) => redact(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
                "Service temporarily unavailable",
            ),
            AppError::Cache(e) => redact(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CACHE_ERROR",
                e.to_string(),
                "Service temporarily unavailable",
            ),
            AppError::Broker(e) => redact(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BROKER_ERROR",
                e.to_string(),
                "Service temporarily unavailable",
            ),
            AppError::Http(e) => redact(
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                e.to_string(),
                "Upstream service unavailable",
            ),
            AppError::Smtp(e) => redact(
                StatusCode::BAD_GATEWAY,
                "SMTP_ERROR",
                e.to_string(),
                "Mail transport unavailable",
            ),
        };

        tracing::error!(code = %code, status = %status.as_u16(), message = %log_message, "API error");

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

fn redact(
    status: StatusCode,
    code: &'static str,
    log_msg: String,
    prod_msg: &'static str,
) -> (StatusCode, &'static str, String, String) {
    let client_msg = if is_production() {
        prod_msg.to_string()
    } else {
        log_msg.clone()
    };
    (status, code, client_msg, log_msg)
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Stable, closed vocabulary for `deliveries.error_code`. Serialized as its string
/// representation so the column round-trips through JSON without typos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "NO_ADDRESS")]
    NoAddress,
    #[serde(rename = "RENDER_FAILED")]
    RenderFailed,
    #[serde(rename = "SEND_FAILED")]
    SendFailed,
    #[serde(rename = "PROVIDER_UNAVAILABLE")]
    ProviderUnavailable,
    #[serde(rename = "INVALID_JOB")]
    InvalidJob,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::NoAddress => "NO_ADDRESS",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::SendFailed => "SEND_FAILED",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::InvalidJob => "INVALID_JOB",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
