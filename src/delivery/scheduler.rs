//! Retry timers with exponential backoff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::DeliveryConfig;

use super::state::{DeliveryState, DeliveryStatus, DeliveryTable, TimerHandle};

/// Backoff policy: `base_delay * 2^attempt`, no jitter, no cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_retries: config.max_retries,
        }
    }
}

/// Reported by a timer task when its delay elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub message_id: String,
    pub generation: u64,
}

/// What the coordinator must do for an elapsed timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The message was resolved or rescheduled after this timer was armed
    Stale,
    /// Send again with the incremented attempt number
    Retry {
        client_id: String,
        payload: String,
        attempt: u32,
    },
    /// Attempts used up; the state has been removed
    Exhausted {
        client_id: String,
        payload: String,
        attempts: u32,
    },
}

/// Owns retry timers for every in-flight message.
///
/// Timers run as detached tokio tasks that report back over an unbounded
/// channel; the receiving side belongs to the coordinator's event loop.
pub struct RetryScheduler {
    policy: RetryPolicy,
    table: Arc<DeliveryTable>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    next_generation: AtomicU64,
}

impl RetryScheduler {
    pub fn new(
        policy: RetryPolicy,
        table: Arc<DeliveryTable>,
    ) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            policy,
            table,
            timer_tx,
            next_generation: AtomicU64::new(0),
        };
        (scheduler, timer_rx)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create or overwrite the state for `message_id` and arm its timer.
    ///
    /// Any timer already armed for the same message is cancelled first. A
    /// retry (`attempt > 0`) keeps the creation time of the first send.
    /// Returns the delay of the new timer.
    pub fn schedule(&self, client_id: &str, message_id: &str, payload: &str, attempt: u32) -> Duration {
        let first_sent_at = self.table.remove(message_id).and_then(|mut previous| {
            previous.cancel_timer();
            (attempt > 0).then_some(previous.created_at)
        });

        let delay = self.policy.delay_for(attempt);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        let mut state = DeliveryState::new(
            client_id.to_string(),
            payload.to_string(),
            attempt,
            self.policy.max_retries,
        );
        if let Some(created_at) = first_sent_at {
            state.created_at = created_at;
        }
        state.arm(self.arm(message_id, generation, delay));
        self.table.insert(message_id.to_string(), state);

        tracing::debug!(
            message_id = %message_id,
            client_id = %client_id,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );

        delay
    }

    fn arm(&self, message_id: &str, generation: u64, delay: Duration) -> TimerHandle {
        let tx = self.timer_tx.clone();
        let fired = TimerFired {
            message_id: message_id.to_string(),
            generation,
        };

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver is gone only after the coordinator stopped
            let _ = tx.send(fired);
        });

        TimerHandle::new(generation, task.abort_handle())
    }

    /// Apply an elapsed timer to the message's state
    pub fn on_timer_fired(&self, fired: &TimerFired) -> RetryDecision {
        {
            let Some(mut state) = self.table.get_mut(&fired.message_id) else {
                return RetryDecision::Stale;
            };

            if state.timer_generation() != Some(fired.generation) {
                return RetryDecision::Stale;
            }
            state.clear_fired_timer();

            if state.has_attempts_left() {
                state.attempts += 1;
                return RetryDecision::Retry {
                    client_id: state.client_id.clone(),
                    payload: state.payload.clone(),
                    attempt: state.attempts,
                };
            }
        }

        match self.table.remove(&fired.message_id) {
            Some(mut state) => {
                state.cancel_timer();
                state.status = DeliveryStatus::Exhausted;
                RetryDecision::Exhausted {
                    client_id: state.client_id,
                    payload: state.payload,
                    attempts: state.attempts,
                }
            }
            None => RetryDecision::Stale,
        }
    }

    /// Drop the state for a message, cancelling its timer
    pub fn discard(&self, message_id: &str) -> Option<DeliveryState> {
        self.table.remove(message_id).map(|mut state| {
            state.cancel_timer();
            state
        })
    }

    /// Cancel every armed timer and clear the table
    pub fn cancel_all(&self) -> usize {
        let drained = self.table.drain();
        let count = drained.len();
        for (_, mut state) in drained {
            state.cancel_timer();
        }
        count
    }
}
