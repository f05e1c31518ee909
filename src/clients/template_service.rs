//! Client for the out-of-scope template service. Renders a template reference
//! plus a variables blob into channel-appropriate content, guarded by the
//! `template-service` breaker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Channel, TemplateReference};
use crate::resilience::CircuitBreaker;

/// Rendered output, tagged by channel so email's `subject`/`body_html`/
/// `body_text` triple and push's `title`/`body` pair never get conflated into
/// one untagged struct with channel-dependent-meaning fields.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedContent {
    Email {
        subject: String,
        body_html: Option<String>,
        body_text: Option<String>,
    },
    Push {
        title: String,
        body: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template service unavailable")]
    Unavailable,
    #[error("template render failed: {0}")]
    Failed(String),
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_code: Option<&'a str>,
    channel: &'static str,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    success: bool,
    #[serde(default)]
    data: Option<RenderedPayload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RenderedPayload {
    Email {
        subject: String,
        #[serde(default)]
        body_html: Option<String>,
        #[serde(default)]
        body_text: Option<String>,
    },
    Push {
        title: String,
        body: String,
    },
}

pub struct TemplateServiceClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl TemplateServiceClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            breaker,
        }
    }

    pub async fn render(
        &self,
        reference: TemplateReference<'_>,
        channel: Channel,
        variables: &Value,
    ) -> Result<RenderedContent, RenderError> {
        if !self.breaker.allow_request() {
            return Err(RenderError::Unavailable);
        }

        let request = match reference {
            TemplateReference::Id(id) => RenderRequest {
                template_id: Some(id),
                template_code: None,
                channel: channel.as_str(),
                variables,
            },
            TemplateReference::Code(code) => RenderRequest {
                template_id: None,
                template_code: Some(code),
                channel: channel.as_str(),
                variables,
            },
        };

        let url = format!("{}/templates/render", self.base_url);
        let response = match self.http.post(&url).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                return Err(RenderError::Failed(e.to_string()));
            }
        };

        if response.status().is_server_error() {
            self.breaker.record_failure();
            return Err(RenderError::Failed(format!(
                "template service returned {}",
                response.status()
            )));
        }

        let parsed: RenderResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                self.breaker.record_failure();
                return Err(RenderError::Failed(e.to_string()));
            }
        };

        self.breaker.record_success();

        if !parsed.success {
            return Err(RenderError::Failed(
                parsed.error.unwrap_or_else(|| "unknown render failure".to_string()),
            ));
        }

        match parsed.data {
            Some(RenderedPayload::Email {
                subject,
                body_html,
                body_text,
            }) => Ok(RenderedContent::Email {
                subject,
                body_html,
                body_text,
            }),
            Some(RenderedPayload::Push { title, body }) => Ok(RenderedContent::Push { title, body }),
            None => Err(RenderError::Failed("empty render response".to_string())),
        }
    }
}
