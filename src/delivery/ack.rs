//! Client acknowledgments
//!
//! An acknowledgment is the only way to stop retries before they run out.
//! It is honored only when it comes from the client the message was
//! addressed to.

use std::sync::Arc;

use super::state::{DeliveryStatus, DeliveryTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Timer cancelled and state removed
    Acknowledged { attempts: u32 },
    /// No in-flight message with this id
    Unknown,
    /// The message belongs to another client; state untouched
    ClientMismatch,
}

impl AckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckOutcome::Acknowledged { .. } => "acknowledged",
            AckOutcome::Unknown => "unknown",
            AckOutcome::ClientMismatch => "client_mismatch",
        }
    }
}

pub struct AcknowledgmentHandler {
    table: Arc<DeliveryTable>,
}

impl AcknowledgmentHandler {
    pub fn new(table: Arc<DeliveryTable>) -> Self {
        Self { table }
    }

    pub fn on_acknowledgment(&self, client_id: &str, message_id: &str) -> AckOutcome {
        match self.table.remove_if(message_id, |state| state.client_id == client_id) {
            Some(mut state) => {
                state.cancel_timer();
                state.status = DeliveryStatus::Acknowledged;

                let latency_ms = chrono::Utc::now()
                    .signed_duration_since(state.created_at)
                    .num_milliseconds()
                    .max(0);

                tracing::info!(
                    message_id = %message_id,
                    client_id = %client_id,
                    attempts = state.attempts,
                    latency_ms = latency_ms,
                    "Delivery acknowledged"
                );

                AckOutcome::Acknowledged {
                    attempts: state.attempts,
                }
            }
            None if self.table.contains(message_id) => {
                tracing::warn!(
                    message_id = %message_id,
                    client_id = %client_id,
                    "ACK client mismatch"
                );
                AckOutcome::ClientMismatch
            }
            None => {
                tracing::debug!(
                    message_id = %message_id,
                    client_id = %client_id,
                    "ACK received for unknown message"
                );
                AckOutcome::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::scheduler::{RetryPolicy, RetryScheduler};

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_success() {
        let table = Arc::new(DeliveryTable::new());
        let (scheduler, mut timers) = RetryScheduler::new(RetryPolicy::default(), table.clone());
        let handler = AcknowledgmentHandler::new(table.clone());

        scheduler.schedule("c1", "m1", "u1", 0);

        assert_eq!(
            handler.on_acknowledgment("c1", "m1"),
            AckOutcome::Acknowledged { attempts: 0 }
        );
        assert!(table.is_empty());

        // Timer was cancelled
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert!(timers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_wrong_client() {
        let table = Arc::new(DeliveryTable::new());
        let (scheduler, _timers) = RetryScheduler::new(RetryPolicy::default(), table.clone());
        let handler = AcknowledgmentHandler::new(table.clone());

        scheduler.schedule("c1", "m1", "u1", 0);
        let before = table.get("m1").unwrap();

        assert_eq!(handler.on_acknowledgment("c2", "m1"), AckOutcome::ClientMismatch);
        assert_eq!(table.get("m1").unwrap(), before);
        assert!(before.timer_armed);
    }

    #[test]
    fn test_acknowledge_unknown() {
        let table = Arc::new(DeliveryTable::new());
        let handler = AcknowledgmentHandler::new(table.clone());

        assert_eq!(handler.on_acknowledgment("c1", "nope"), AckOutcome::Unknown);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_ack_is_unknown() {
        let table = Arc::new(DeliveryTable::new());
        let (scheduler, _timers) = RetryScheduler::new(RetryPolicy::default(), table.clone());
        let handler = AcknowledgmentHandler::new(table);

        scheduler.schedule("c1", "m1", "u1", 0);
        assert!(matches!(
            handler.on_acknowledgment("c1", "m1"),
            AckOutcome::Acknowledged { .. }
        ));
        assert_eq!(handler.on_acknowledgment("c1", "m1"), AckOutcome::Unknown);
    }
}
