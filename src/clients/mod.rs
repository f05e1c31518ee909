//! HTTP clients for the three out-of-scope collaborators: the user service,
//! the template service, and the notification gateway. Every call is gated by
//! the resilience layer's per-dependency breaker.

pub mod gateway;
pub mod template_service;
pub mod user_service;

pub use gateway::GatewayClient;
pub use template_service::{RenderedContent, TemplateServiceClient};
pub use user_service::{PreferenceLookup, UserServiceClient};
