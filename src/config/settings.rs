use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub shortener: ShortenerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Retry policy for live delivery
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Delay before the first retry, doubled on every attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Total live sends before falling back to the broker
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Capacity of the coordinator command channel
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    #[default]
    Mqtt,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_client_id")]
    pub client_id: String,
    /// Topic (MQTT) or channel (Redis) fallback messages are published to
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Upper bound on a single Redis round trip
    #[serde(default = "default_redis_response_timeout_ms")]
    pub redis_response_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound frames buffered per connection before it counts as not writable
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShortenerConfig {
    /// Prefix for generated short links
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_command_buffer() -> usize {
    1024
}

fn default_broker_host() -> String {
    "test.mosquitto.org".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_broker_client_id() -> String {
    "link-relay".to_string()
}

fn default_topic() -> String {
    "url".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_response_timeout_ms() -> u64 {
    2000
}

fn default_channel_buffer() -> usize {
    32
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_code_length() -> usize {
    8
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("delivery.base_delay_ms", default_base_delay_ms())?
            .set_default("delivery.max_retries", default_max_retries())?
            .set_default("broker.backend", "mqtt")?
            .set_default("broker.topic", default_topic())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, BROKER__HOST, DELIVERY__MAX_RETRIES, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl DeliveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_broker_client_id(),
            topic: default_topic(),
            keep_alive_secs: default_keep_alive_secs(),
            redis_url: default_redis_url(),
            redis_response_timeout_ms: default_redis_response_timeout_ms(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            code_length: default_code_length(),
        }
    }
}
