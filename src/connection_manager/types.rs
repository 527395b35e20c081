//! Channel handle and related types

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::websocket::ServerMessage;

/// Handle for a single client connection
///
/// Holds the sending half of the connection's outbound queue; the socket task
/// owns the receiving half and writes frames to the wire.
#[derive(Debug)]
pub struct ClientChannel {
    pub id: Uuid,
    pub client_id: String,
    sender: mpsc::Sender<ServerMessage>,
    pub connected_at: DateTime<Utc>,
}

impl ClientChannel {
    pub fn new(client_id: String, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            sender,
            connected_at: Utc::now(),
        }
    }

    /// Queue a frame without waiting. Fails if the connection is gone or its
    /// outbound buffer is full.
    pub fn try_send(&self, message: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.sender.try_send(message)
    }
}
