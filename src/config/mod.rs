mod settings;

pub use settings::{
    BreakerConfig, BrokerConfig, CacheConfig, ChannelKind, DatabaseConfig, OtelConfig,
    ProviderConfig, ProviderKindConfig, RetryConfig, ServerConfig, ServicesConfig, Settings,
};
