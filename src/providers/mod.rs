//! Provider abstraction: one `Provider` per transport, chosen at startup by
//! `ProviderFactory` from the configured `ProviderKindConfig`. Generalizes the
//! queue/cluster factory-keyed-by-enum pattern used elsewhere in this codebase
//! to "pick the transport implementation this process was configured for."

pub mod email_http_api;
pub mod push_http_api;
pub mod smtp;

use async_trait::async_trait;

use crate::clients::RenderedContent;
use crate::config::{ProviderConfig, ProviderKindConfig};

pub use email_http_api::HttpEmailApiProvider;
pub use push_http_api::HttpPushApiProvider;
pub use smtp::SmtpProvider;

/// What the orchestrator hands a provider: a resolved address plus the
/// rendered content (already in the channel-appropriate shape).
#[derive(Debug, Clone)]
pub struct Message<'a> {
    pub address: &'a str,
    pub content: &'a RenderedContent,
}

/// What a provider hands back on success: whatever transport-level id it can
/// offer for correlating with a later webhook, or `None` if it has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected message: {0}")]
    Rejected(String),
    #[error("provider transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier stored in `deliveries.provider` and used as the
    /// per-provider breaker key.
    fn name(&self) -> &'static str;

    async fn send(&self, message: Message<'_>) -> Result<SendReceipt, ProviderError>;
}

/// Builds the single configured provider for this process. One process runs
/// one channel, so only one provider is ever live at a time — there is no
/// registry keyed by channel, just a single boxed trait object in `AppState`.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn build(config: &ProviderConfig, http: reqwest::Client) -> Result<Box<dyn Provider>, crate::error::AppError> {
        match config.kind {
            ProviderKindConfig::Smtp => Ok(Box::new(SmtpProvider::from_config(config)?)),
            ProviderKindConfig::HttpEmailApi => Ok(Box::new(HttpEmailApiProvider::from_config(config, http))),
            ProviderKindConfig::HttpPushApi => Ok(Box::new(HttpPushApiProvider::from_config(config, http))),
        }
    }
}

/// In-memory provider double, compiled in both unit and integration test
/// builds (the latter link against this crate without `cfg(test)`).
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory provider double for orchestrator tests: records every message
    /// it was asked to send and can be told to fail the next N calls.
    pub struct RecordingProvider {
        pub sent: Mutex<Vec<String>>,
        pub fail_next: AtomicUsize,
    }

    impl RecordingProvider {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_next: AtomicUsize::new(0),
            }
        }

        pub fn fail_next_n(self, n: usize) -> Self {
            self.fail_next.store(n, Ordering::SeqCst);
            self
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: Message<'_>) -> Result<SendReceipt, ProviderError> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Transport("forced failure".to_string()));
            }
            self.sent.lock().unwrap().push(message.address.to_string());
            Ok(SendReceipt {
                provider_message_id: Some(format!("recording-{}", self.sent_count())),
            })
        }
    }
}
