//! HTTP push API provider (FCM-shaped): legacy `to`/`notification` payload,
//! success discriminated by a top-level `success: 1` plus a per-result error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clients::RenderedContent;
use crate::config::ProviderConfig;

use super::{Message, Provider, ProviderError, SendReceipt};

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    to: &'a str,
    notification: Notification<'a>,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    success: i32,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize, Default)]
struct FcmResult {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpPushApiProvider {
    http: reqwest::Client,
    api_url: String,
    server_key: String,
}

impl HttpPushApiProvider {
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            api_url: config
                .http_api_url
                .clone()
                .unwrap_or_else(|| "https://fcm.googleapis.com/fcm/send".to_string()),
            server_key: config.http_api_key.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Provider for HttpPushApiProvider {
    fn name(&self) -> &'static str {
        "http-push-api"
    }

    async fn send(&self, message: Message<'_>) -> Result<SendReceipt, ProviderError> {
        let (title, body) = match message.content {
            RenderedContent::Push { title, body } => (title.as_str(), body.as_str()),
            RenderedContent::Email { .. } => {
                return Err(ProviderError::Rejected(
                    "http push provider cannot send email content".to_string(),
                ))
            }
        };

        if self.server_key.is_empty() {
            return Err(ProviderError::Rejected("push provider server key not configured".to_string()));
        }

        let payload = SendPayload {
            to: message.address,
            notification: Notification { title, body },
        };

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("key={}", self.server_key))
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

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Transport(format!("push api returned {status}")));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("push api error: {status} - {body}")));
        }

        let parsed: FcmResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if parsed.success == 1 {
            let message_id = parsed.results.into_iter().next().and_then(|r| r.message_id);
            Ok(SendReceipt {
                provider_message_id: message_id,
            })
        } else {
            let error = parsed
                .results
                .into_iter()
                .next()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "unknown push provider error".to_string());
            Err(ProviderError::Rejected(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults_api_url() {
        let config = ProviderConfig {
            kind: crate::config::ProviderKindConfig::HttpPushApi,
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            implicit_tls: false,
            http_api_url: None,
            http_api_key: Some("server-key".to_string()),
        };
        let provider = HttpPushApiProvider::from_config(&config, reqwest::Client::new());
        assert_eq!(provider.api_url, "https://fcm.googleapis.com/fcm/send");
    }

    #[tokio::test]
    async fn test_send_rejects_email_content() {
        let config = ProviderConfig {
            kind: crate::config::ProviderKindConfig::HttpPushApi,
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            implicit_tls: false,
            http_api_url: None,
            http_api_key: Some("server-key".to_string()),
        };
        let provider = HttpPushApiProvider::from_config(&config, reqwest::Client::new());
        let content = RenderedContent::Email {
            subject: "x".to_string(),
            body_html: None,
            body_text: None,
        };
        let result = provider
            .send(Message {
                address: "token",
                content: &content,
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
    }
}
