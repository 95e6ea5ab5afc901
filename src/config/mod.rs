mod settings;

pub use settings::{
    LogConfig, MergerConfig, MetricsConfig, RedisConfig, ServerConfig, Settings, StoreConfig,
    WebSocketConfig,
};
