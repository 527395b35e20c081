//! Redis Pub/Sub fallback backend.
//!
//! Redis Pub/Sub drops messages for subscribers that are not connected at
//! publish time, so this backend is weaker than MQTT QoS 1. It exists for
//! deployments that already run Redis and consume the channel continuously.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;

use super::{FallbackError, FallbackMessage, FallbackPublisher};

pub struct RedisFallbackPublisher {
    connection: ConnectionManager,
    channel: String,
}

impl RedisFallbackPublisher {
    pub async fn connect(
        url: &str,
        channel: &str,
        response_timeout: Duration,
    ) -> Result<Self, FallbackError> {
        let client = redis::Client::open(url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(response_timeout)
            .set_response_timeout(response_timeout);
        let connection = client.get_connection_manager_with_config(config).await?;
        tracing::info!(
            channel = %channel,
            response_timeout_ms = response_timeout.as_millis() as u64,
            "Redis fallback connection established"
        );

        Ok(Self {
            connection,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl FallbackPublisher for RedisFallbackPublisher {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, message: &FallbackMessage) -> Result<(), FallbackError> {
        let body = message.to_json()?;
        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(&self.channel, body).await?;

        if receivers == 0 {
            tracing::warn!(
                channel = %self.channel,
                client_id = %message.client_id,
                "Fallback published with no Redis subscribers"
            );
        } else {
            tracing::debug!(
                channel = %self.channel,
                client_id = %message.client_id,
                receivers = receivers,
                "Fallback published to Redis"
            );
        }
        Ok(())
    }
}
