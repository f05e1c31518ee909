//! SMTP transport provider. Builds one `AsyncSmtpTransport` at startup and
//! reuses it for every send — lettre pools connections internally.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};

use crate::clients::RenderedContent;
use crate::config::ProviderConfig;
use crate::error::AppError;

use super::{Message, Provider, ProviderError, SendReceipt};

pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AppError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("smtp_host is required".into())))?;

        let builder = if config.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| AppError::Config(config::ConfigError::Message(e.to_string())))?;

        let builder = if let Some(port) = config.smtp_port {
            builder.port(port)
        } else {
            builder
        };

        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        let from_address = config
            .smtp_username
            .clone()
            .unwrap_or_else(|| "notifications@localhost".to_string());

        Ok(Self {
            transport: builder.build(),
            from_address,
        })
    }
}

#[async_trait]
impl Provider for SmtpProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: Message<'_>) -> Result<SendReceipt, ProviderError> {
        let (subject, body_html, body_text) = match message.content {
            RenderedContent::Email {
                subject,
                body_html,
                body_text,
            } => (subject.as_str(), body_html.as_deref(), body_text.as_deref()),
            RenderedContent::Push { .. } => {
                return Err(ProviderError::Rejected(
                    "smtp provider cannot send push content".to_string(),
                ))
            }
        };

        let body = body_html.or(body_text).unwrap_or_default().to_string();
        let content_type = if body_html.is_some() {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        // lettre doesn't hand back a transport-assigned id, so we mint the
        // Message-ID header ourselves and use it for webhook correlation.
        let message_id = format!("{}@notifyfabric", uuid::Uuid::new_v4());

        let email = LettreMessage::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ProviderError::Rejected(e.to_string()))?,
            )
            .to(message
                .address
                .parse()
                .map_err(|e: lettre::address::AddressError| ProviderError::Rejected(e.to_string()))?)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(content_type)
            .body(body)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        match self.transport.send(email).await {
            Ok(_response) => Ok(SendReceipt {
                provider_message_id: Some(message_id),
            }),
            Err(e) if e.is_permanent() || e.is_client() => Err(ProviderError::Rejected(e.to_string())),
            Err(e) => Err(ProviderError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ProviderConfig {
        ProviderConfig {
            kind: crate::config::ProviderKindConfig::Smtp,
            smtp_host: Some("localhost".to_string()),
            smtp_port: Some(587),
            smtp_username: Some("bot@example.com".to_string()),
            smtp_password: Some("secret".to_string()),
            implicit_tls: false,
            http_api_url: None,
            http_api_key: None,
        }
    }

    #[test]
    fn test_from_config_builds_starttls_transport_for_587() {
        let provider = SmtpProvider::from_config(&base_config());
        assert!(provider.is_ok());
    }

    #[test]
    fn test_from_config_builds_implicit_tls_transport_for_465() {
        let mut config = base_config();
        config.implicit_tls = true;
        config.smtp_port = Some(465);
        let provider = SmtpProvider::from_config(&config);
        assert!(provider.is_ok());
    }

    #[test]
    fn test_from_config_requires_host() {
        let mut config = base_config();
        config.smtp_host = None;
        assert!(SmtpProvider::from_config(&config).is_err());
    }
}
