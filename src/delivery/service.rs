use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connection_manager::{ClientChannel, ConnectionRegistry};
use crate::websocket::{ClientMessage, ServerMessage};

use super::coordinator::{DeliveryCommand, DeliveryCoordinator};
use super::scheduler::TimerFired;
use super::state::DeliveryTable;
use super::stats::{DeliveryStats, DeliveryStatsSnapshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("delivery coordinator is not running")]
    Stopped,
}

/// Cloneable front door to a running coordinator.
///
/// The request layer calls `initiate_delivery`; the transport layer calls the
/// `on_*` hooks. Deliveries and acknowledgments are queued to the coordinator
/// task, connect/disconnect go straight to the registry.
#[derive(Clone)]
pub struct DeliveryService {
    commands: mpsc::Sender<DeliveryCommand>,
    registry: Arc<ConnectionRegistry>,
    table: Arc<DeliveryTable>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryService {
    /// Start the coordinator's event loop on its own task
    pub fn spawn(
        coordinator: DeliveryCoordinator,
        timers: mpsc::UnboundedReceiver<TimerFired>,
        command_buffer: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(command_buffer.max(1));

        let service = Self {
            commands,
            registry: coordinator.registry().clone(),
            table: coordinator.table().clone(),
            stats: coordinator.stats().clone(),
        };

        let handle = tokio::spawn(coordinator.run(command_rx, timers, shutdown));
        (service, handle)
    }

    /// Queue a delivery. Returns once accepted; the outcome is asynchronous.
    pub async fn initiate_delivery(
        &self,
        client_id: &str,
        message_id: &str,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        if client_id.is_empty() {
            return Err(DeliveryError::EmptyField("clientId"));
        }
        if message_id.is_empty() {
            return Err(DeliveryError::EmptyField("messageId"));
        }
        if payload.is_empty() {
            return Err(DeliveryError::EmptyField("payload"));
        }

        self.commands
            .send(DeliveryCommand::Deliver {
                client_id: client_id.to_string(),
                message_id: message_id.to_string(),
                payload: payload.to_string(),
            })
            .await
            .map_err(|_| DeliveryError::Stopped)
    }

    pub fn on_connect(
        &self,
        client_id: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Arc<ClientChannel> {
        self.registry.register(client_id, sender)
    }

    pub fn on_disconnect(&self, client_id: &str) -> bool {
        self.registry.unregister(client_id)
    }

    /// Disconnect hook for one socket; leaves a newer connection in place
    pub fn on_connection_closed(&self, client_id: &str, connection_id: Uuid) -> bool {
        self.registry.unregister_connection(client_id, connection_id)
    }

    /// Decode an inbound text frame and dispatch it.
    ///
    /// Returns a reply frame for the client, if any. Frames that fail to
    /// decode are logged and dropped.
    pub async fn on_inbound_message(&self, client_id: &str, raw: &str) -> Option<ServerMessage> {
        let message = match ClientMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "Dropping inbound message");
                return None;
            }
        };

        match message {
            ClientMessage::Ack { message_id } => {
                tracing::debug!(
                    client_id = %client_id,
                    message_id = %message_id,
                    "Acknowledgment received"
                );
                let command = DeliveryCommand::Acknowledge {
                    client_id: client_id.to_string(),
                    message_id,
                };
                if self.commands.send(command).await.is_err() {
                    tracing::warn!(
                        client_id = %client_id,
                        "Coordinator stopped, acknowledgment dropped"
                    );
                }
                None
            }
            ClientMessage::Ping => Some(ServerMessage::pong()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<DeliveryTable> {
        &self.table
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot(self.table.len())
    }
}
