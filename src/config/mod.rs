mod settings;

pub use settings::{
    BrokerBackend, BrokerConfig, DeliveryConfig, ServerConfig, Settings, ShortenerConfig,
    WebSocketConfig,
};
