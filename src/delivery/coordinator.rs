use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection_manager::ConnectionRegistry;
use crate::fallback::{FallbackMessage, FallbackPublisher};
use crate::metrics::{DeliveryMetrics, FallbackMetrics};
use crate::websocket::ServerMessage;

use super::ack::{AckOutcome, AcknowledgmentHandler};
use super::scheduler::{RetryDecision, RetryPolicy, RetryScheduler, TimerFired};
use super::state::DeliveryTable;
use super::stats::DeliveryStats;

/// Work items for the coordinator's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryCommand {
    Deliver {
        client_id: String,
        message_id: String,
        payload: String,
    },
    Acknowledge {
        client_id: String,
        message_id: String,
    },
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Frame queued on the live channel and a retry timer armed
    Sent { delay: Duration },
    /// Routed to the broker. The publish runs detached; its task yields
    /// false if the broker rejected the message.
    FellBack { publish: JoinHandle<bool> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No registered channel, or the channel could not take the frame
    Unreachable,
    /// Every live attempt went unacknowledged
    Exhausted,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Unreachable => "unreachable",
            FallbackReason::Exhausted => "exhausted",
        }
    }
}

/// Orchestrates live delivery, retries and broker fallback.
///
/// One instance lives for the whole process. `run` consumes it as the single
/// task that mutates delivery state, so deliveries, timer fires and
/// acknowledgments for a message never interleave.
pub struct DeliveryCoordinator {
    registry: Arc<ConnectionRegistry>,
    scheduler: RetryScheduler,
    acks: AcknowledgmentHandler,
    publisher: Arc<dyn FallbackPublisher>,
    table: Arc<DeliveryTable>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryCoordinator {
    pub fn new(
        policy: RetryPolicy,
        registry: Arc<ConnectionRegistry>,
        publisher: Arc<dyn FallbackPublisher>,
    ) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let table = Arc::new(DeliveryTable::new());
        let (scheduler, timers) = RetryScheduler::new(policy, table.clone());
        let acks = AcknowledgmentHandler::new(table.clone());

        let coordinator = Self {
            registry,
            scheduler,
            acks,
            publisher,
            table,
            stats: Arc::new(DeliveryStats::default()),
        };
        (coordinator, timers)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<DeliveryTable> {
        &self.table
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Send over the live channel if there is one, otherwise fall back.
    ///
    /// Exactly one send or one fallback publish per call.
    #[tracing::instrument(
        name = "delivery.attempt",
        skip_all,
        fields(client_id = %client_id, message_id = %message_id, attempt = attempt)
    )]
    pub async fn attempt_delivery(
        &self,
        client_id: &str,
        message_id: &str,
        payload: &str,
        attempt: u32,
    ) -> DeliveryOutcome {
        let sent = match self.registry.lookup(client_id) {
            Some(channel) => match channel.try_send(ServerMessage::delivery(payload, attempt, message_id)) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %channel.id,
                        error = %e,
                        "Channel not writable"
                    );
                    false
                }
            },
            None => false,
        };

        if sent {
            DeliveryStats::incr(&self.stats.total_sent);
            DeliveryMetrics::record_send(attempt);

            let delay = self.scheduler.schedule(client_id, message_id, payload, attempt);
            DeliveryMetrics::set_pending(self.table.len());

            tracing::info!(
                retry_in_ms = delay.as_millis() as u64,
                "Delivery sent over WebSocket"
            );
            return DeliveryOutcome::Sent { delay };
        }

        // No channel to retry over; the message ends here
        if self.scheduler.discard(message_id).is_some() {
            DeliveryMetrics::set_pending(self.table.len());
        }

        let publish = self.fall_back(client_id, payload, FallbackReason::Unreachable);
        DeliveryOutcome::FellBack { publish }
    }

    /// Act on an elapsed retry timer
    pub async fn on_timer_fired(&self, fired: TimerFired) {
        match self.scheduler.on_timer_fired(&fired) {
            RetryDecision::Stale => {
                tracing::trace!(
                    message_id = %fired.message_id,
                    generation = fired.generation,
                    "Ignoring stale retry timer"
                );
            }
            RetryDecision::Retry {
                client_id,
                payload,
                attempt,
            } => {
                DeliveryStats::incr(&self.stats.total_retries);
                tracing::info!(
                    message_id = %fired.message_id,
                    client_id = %client_id,
                    attempt = attempt,
                    "No acknowledgment, retrying delivery"
                );
                self.attempt_delivery(&client_id, &fired.message_id, &payload, attempt)
                    .await;
            }
            RetryDecision::Exhausted {
                client_id,
                payload,
                attempts,
            } => {
                DeliveryStats::incr(&self.stats.total_exhausted);
                DeliveryMetrics::set_pending(self.table.len());
                tracing::info!(
                    message_id = %fired.message_id,
                    client_id = %client_id,
                    sends = attempts + 1,
                    "Max retries reached, falling back to broker"
                );
                self.fall_back(&client_id, &payload, FallbackReason::Exhausted);
            }
        }
    }

    pub fn acknowledge(&self, client_id: &str, message_id: &str) -> AckOutcome {
        let outcome = self.acks.on_acknowledgment(client_id, message_id);
        match outcome {
            AckOutcome::Acknowledged { attempts } => {
                DeliveryStats::incr(&self.stats.total_acknowledged);
                DeliveryMetrics::record_acknowledged(attempts);
                DeliveryMetrics::set_pending(self.table.len());
            }
            AckOutcome::Unknown | AckOutcome::ClientMismatch => {
                DeliveryStats::incr(&self.stats.total_ignored_acks);
                DeliveryMetrics::record_ack_ignored(outcome.as_str());
            }
        }
        outcome
    }

    pub async fn handle_command(&self, command: DeliveryCommand) {
        match command {
            DeliveryCommand::Deliver {
                client_id,
                message_id,
                payload,
            } => {
                DeliveryStats::incr(&self.stats.total_initiated);
                self.attempt_delivery(&client_id, &message_id, &payload, 0)
                    .await;
            }
            DeliveryCommand::Acknowledge {
                client_id,
                message_id,
            } => {
                self.acknowledge(&client_id, &message_id);
            }
        }
    }

    /// Hand the payload to the broker on its own task.
    ///
    /// The event loop never waits on the broker; the publish result is only
    /// logged and counted.
    fn fall_back(&self, client_id: &str, payload: &str, reason: FallbackReason) -> JoinHandle<bool> {
        DeliveryStats::incr(&self.stats.total_fallbacks);
        FallbackMetrics::record_publish(reason.as_str());

        let publisher = self.publisher.clone();
        let stats = self.stats.clone();
        let message = FallbackMessage::new(client_id, payload);

        tokio::spawn(async move {
            match publisher.publish(&message).await {
                Ok(()) => {
                    tracing::info!(
                        client_id = %message.client_id,
                        reason = reason.as_str(),
                        backend = publisher.backend(),
                        "Fell back to broker"
                    );
                    true
                }
                Err(e) => {
                    DeliveryStats::incr(&stats.total_fallback_failures);
                    FallbackMetrics::record_failure();
                    tracing::error!(
                        client_id = %message.client_id,
                        reason = reason.as_str(),
                        backend = publisher.backend(),
                        error = %e,
                        "Broker fallback publish failed"
                    );
                    false
                }
            }
        })
    }

    /// Event loop: serializes commands and timer fires until shutdown or until
    /// every command sender is dropped.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<DeliveryCommand>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            base_delay_ms = self.scheduler.policy().base_delay.as_millis() as u64,
            max_retries = self.scheduler.policy().max_retries,
            "Delivery coordinator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Delivery coordinator received shutdown signal");
                    break;
                }
                Some(fired) = timers.recv() => {
                    self.on_timer_fired(fired).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("All command senders dropped");
                        break;
                    }
                },
            }
        }

        let cancelled = self.scheduler.cancel_all();
        DeliveryMetrics::set_pending(0);
        tracing::info!(
            cancelled_retries = cancelled,
            "Delivery coordinator stopped"
        );
    }
}
