//! HTTP email API provider (SendGrid-shaped): `POST` a JSON payload, `202`
//! means accepted, the transport id rides back on `X-Message-Id`.

use async_trait::async_trait;
use serde::Serialize;

use crate::clients::RenderedContent;
use crate::config::ProviderConfig;

use super::{Message, Provider, ProviderError, SendReceipt};

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
    subject: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    content: Vec<Content<'a>>,
}

pub struct HttpEmailApiProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_address: String,
}

impl HttpEmailApiProvider {
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            api_url: config
                .http_api_url
                .clone()
                .unwrap_or_else(|| "https://api.sendgrid.com/v3/mail/send".to_string()),
            api_key: config.http_api_key.clone().unwrap_or_default(),
            from_address: "notifications@localhost".to_string(),
        }
    }
}

#[async_trait]
impl Provider for HttpEmailApiProvider {
    fn name(&self) -> &'static str {
        "http-email-api"
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
                    "http email provider cannot send push content".to_string(),
                ))
            }
        };

        let mut content = Vec::new();
        if let Some(text) = body_text {
            content.push(Content {
                content_type: "text/plain",
                value: text,
            });
        }
        if let Some(html) = body_html {
            content.push(Content {
                content_type: "text/html",
                value: html,
            });
        }

        let payload = SendPayload {
            personalizations: vec![Personalization {
                to: vec![EmailAddress { email: message.address }],
                subject,
            }],
            from: EmailAddress {
                email: &self.from_address,
            },
            content,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Transport(e.to_string())
                } else {
                    ProviderError::Rejected(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::ACCEPTED {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(SendReceipt {
                provider_message_id: message_id,
            });
        }

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::Transport(format!("email api returned {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Rejected(format!("email api error: {status} - {body}")))
        }
    }
}
