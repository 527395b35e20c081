//! Broker fallback for messages that cannot be delivered live.
//!
//! # Backends
//!
//! - `MqttFallbackPublisher`: QoS 1 publish through `rumqttc` (default)
//! - `RedisFallbackPublisher`: Redis `PUBLISH` on a channel of the same name
//!
//! Use `create_fallback_publisher()` to build the configured backend. The
//! fallback is the terminal delivery path: a failed publish is reported to the
//! caller and never retried here.

mod backoff;
mod mqtt_backend;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{BrokerBackend, BrokerConfig};

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use mqtt_backend::{MqttDriver, MqttFallbackPublisher};
pub use redis_backend::RedisFallbackPublisher;

/// Body published to the broker topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackMessage {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub url: String,
}

impl FallbackMessage {
    pub fn new(client_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            url: url.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, FallbackError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("failed to encode fallback message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait FallbackPublisher: Send + Sync {
    /// Backend name for logs and stats
    fn backend(&self) -> &'static str;

    /// Hand the message to the broker. Does not wait for subscribers.
    async fn publish(&self, message: &FallbackMessage) -> Result<(), FallbackError>;
}

/// Create the configured fallback publisher.
///
/// The MQTT backend also returns the task driving its connection, which stops
/// when `shutdown` fires.
pub async fn create_fallback_publisher(
    config: &BrokerConfig,
    shutdown: broadcast::Receiver<()>,
) -> Result<(Arc<dyn FallbackPublisher>, Option<JoinHandle<()>>), FallbackError> {
    match config.backend {
        BrokerBackend::Mqtt => {
            tracing::info!(
                backend = "mqtt",
                host = %config.host,
                port = config.port,
                topic = %config.topic,
                "Creating MQTT fallback publisher"
            );
            let (publisher, driver) = MqttFallbackPublisher::new(config);
            let handle = tokio::spawn(driver.run(shutdown));
            Ok((Arc::new(publisher), Some(handle)))
        }
        BrokerBackend::Redis => {
            tracing::info!(
                backend = "redis",
                channel = %config.topic,
                "Creating Redis fallback publisher"
            );
            let publisher = RedisFallbackPublisher::connect(
                &config.redis_url,
                &config.topic,
                Duration::from_millis(config.redis_response_timeout_ms),
            )
            .await?;
            Ok((Arc::new(publisher), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_message_shape() {
        let message = FallbackMessage::new("c1", "u1");
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"clientId": "c1", "url": "u1"}));
    }
}
