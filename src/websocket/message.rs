use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Confirms receipt of a delivery frame
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Ping,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("empty messageId")]
    EmptyMessageId,
}

impl ClientMessage {
    /// Decode a raw text frame into a typed client message
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let msg: ClientMessage = serde_json::from_str(raw)?;
        if let ClientMessage::Ack { message_id } = &msg {
            if message_id.is_empty() {
                return Err(DecodeError::EmptyMessageId);
            }
        }
        Ok(msg)
    }
}

/// A payload pushed to a connected client, `{payload, attempt}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFrame {
    #[serde(rename = "shortenedURL")]
    pub payload: String,
    #[serde(rename = "retryCount")]
    pub attempt: u32,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

/// Control frames that are not deliveries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Pong,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Delivery(DeliveryFrame),
    Control(ControlMessage),
}

impl ServerMessage {
    pub fn delivery(payload: impl Into<String>, attempt: u32, message_id: impl Into<String>) -> Self {
        Self::Delivery(DeliveryFrame {
            payload: payload.into(),
            attempt,
            message_id: message_id.into(),
        })
    }

    pub fn pong() -> Self {
        Self::Control(ControlMessage::Pong)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
