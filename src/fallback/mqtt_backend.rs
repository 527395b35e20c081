//! MQTT fallback backend using rumqttc

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::broadcast;

use crate::config::BrokerConfig;

use super::{ExponentialBackoff, FallbackError, FallbackMessage, FallbackPublisher};

/// Outstanding requests buffered between publishers and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// rumqttc rejects keep-alive intervals shorter than this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Publishes fallback messages with QoS 1 (at-least-once)
pub struct MqttFallbackPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttFallbackPublisher {
    /// Build the client. Nothing is sent until the returned driver runs.
    pub fn new(config: &BrokerConfig) -> (Self, MqttDriver) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS)));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let publisher = Self {
            client: client.clone(),
            topic: config.topic.clone(),
        };
        let driver = MqttDriver {
            client,
            eventloop,
            broker: format!("{}:{}", config.host, config.port),
            backoff: ExponentialBackoff::new(),
        };
        (publisher, driver)
    }
}

#[async_trait]
impl FallbackPublisher for MqttFallbackPublisher {
    fn backend(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, message: &FallbackMessage) -> Result<(), FallbackError> {
        let body = message.to_json()?;
        // Fails fast with a full request queue while the broker is unreachable
        self.client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, body)?;

        tracing::debug!(
            topic = %self.topic,
            client_id = %message.client_id,
            "Fallback message queued for MQTT broker"
        );
        Ok(())
    }
}

/// Drives the rumqttc event loop: connects, resends unacknowledged QoS 1
/// publishes after reconnect, and backs off while the broker is unreachable.
pub struct MqttDriver {
    client: AsyncClient,
    eventloop: EventLoop,
    broker: String,
    backoff: ExponentialBackoff,
}

impl MqttDriver {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(broker = %self.broker, "MQTT driver started");
        let mut disconnecting = false;

        loop {
            tokio::select! {
                _ = shutdown.recv(), if !disconnecting => {
                    tracing::info!("MQTT driver received shutdown signal");
                    disconnecting = true;
                    if self.client.disconnect().await.is_err() {
                        break;
                    }
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            self.backoff.reset();
                            tracing::info!(broker = %self.broker, code = ?ack.code, "Connected to MQTT broker");
                        }
                        Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                            tracing::trace!(pkid = ack.pkid, "Broker acknowledged fallback publish");
                        }
                        Ok(_) => {}
                        Err(_) if disconnecting => break,
                        Err(ConnectionError::ConnectionRefused(code)) => {
                            let delay = self.backoff.next_delay();
                            tracing::error!(
                                broker = %self.broker,
                                code = ?code,
                                retry_in_ms = delay.as_millis() as u64,
                                "MQTT broker refused connection"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            let delay = self.backoff.next_delay();
                            tracing::warn!(
                                broker = %self.broker,
                                error = %e,
                                attempt = self.backoff.attempt(),
                                retry_in_ms = delay.as_millis() as u64,
                                "MQTT connection error, reconnecting"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        tracing::info!("MQTT driver stopped");
    }
}
