use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Which channel worker this process runs. One binary, selected at startup,
/// mirroring how the upstream app picks its concerns from one `Settings` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Push,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub channel: ChannelKind,
    #[serde(default)]
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub services: ServicesConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_dlq_routing_key")]
    pub dlq_routing_key: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_pool_overflow")]
    pub pool_overflow: u32,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_url")]
    pub url: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    pub user_service_url: String,
    pub template_service_url: String,
    pub gateway_url: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKindConfig {
    Smtp,
    HttpEmailApi,
    HttpPushApi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKindConfig,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// `true` = connect with TLS already established (port 465, no STARTTLS upgrade).
    /// `false` = plain connect then STARTTLS (port 587). Deliberately the reverse of
    /// the common `use_tls` naming, which inverts the protocol meaning at port 465.
    #[serde(default)]
    pub implicit_tls: bool,
    #[serde(default)]
    pub http_api_url: Option<String>,
    #[serde(default)]
    pub http_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_retry_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_retry_attempts(),
            min_wait_ms: default_retry_min_wait_ms(),
            max_wait_ms: default_retry_max_wait_ms(),
            multiplier: default_retry_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_open_timeout_seconds")]
    pub open_timeout_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failure_threshold(),
            open_timeout_seconds: default_breaker_open_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_otel_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_otel_sampling_ratio(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_queue_name() -> String {
    "email.queue".to_string()
}
fn default_dlq_routing_key() -> String {
    "dead-letter".to_string()
}
fn default_prefetch_count() -> u16 {
    10
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    5_000
}
fn default_pool_size() -> u32 {
    10
}
fn default_pool_overflow() -> u32 {
    20
}
fn default_connect_timeout_seconds() -> u32 {
    30
}
fn default_cache_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_min_wait_ms() -> u64 {
    1_000
}
fn default_retry_max_wait_ms() -> u64 {
    10_000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_open_timeout_seconds() -> u64 {
    60
}
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}
fn default_otel_service_name() -> String {
    "notify-fabric".to_string()
}
fn default_otel_sampling_ratio() -> f64 {
    1.0
}
fn default_http_timeout_seconds() -> u64 {
    30
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("broker.queue_name", default_queue_name())?
            .set_default("broker.dlq_routing_key", default_dlq_routing_key())?
            .set_default("broker.prefetch_count", default_prefetch_count() as i64)?
            .set_default("broker.reconnect_attempts", default_reconnect_attempts() as i64)?
            .set_default(
                "broker.reconnect_base_delay_ms",
                default_reconnect_base_delay_ms() as i64,
            )?
            .set_default("database.pool_size", default_pool_size() as i64)?
            .set_default("database.pool_overflow", default_pool_overflow() as i64)?
            .set_default(
                "database.connect_timeout_seconds",
                default_connect_timeout_seconds() as i64,
            )?
            .set_default("cache.url", default_cache_url())?
            .set_default("cache.ttl_seconds", default_cache_ttl_seconds() as i64)?
            .set_default("retry.max_attempts", default_max_retry_attempts() as i64)?
            .set_default("retry.min_wait_ms", default_retry_min_wait_ms() as i64)?
            .set_default("retry.max_wait_ms", default_retry_max_wait_ms() as i64)?
            .set_default("retry.multiplier", default_retry_multiplier())?
            .set_default(
                "breaker.failure_threshold",
                default_breaker_failure_threshold() as i64,
            )?
            .set_default(
                "breaker.open_timeout_seconds",
                default_breaker_open_timeout_seconds() as i64,
            )?
            .set_default("http_timeout_seconds", default_http_timeout_seconds() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
