//! Per-message delivery state and the table that owns it

use chrono::{DateTime, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Acknowledged,
    Exhausted,
}

/// Cancellation token for one armed retry timer
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    pub(crate) fn new(generation: u64, abort: AbortHandle) -> Self {
        Self { generation, abort }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the timer. A timer cancelled before it elapses never reports.
    pub fn cancel(self) {
        self.abort.abort();
    }
}

/// One in-flight message
#[derive(Debug)]
pub struct DeliveryState {
    pub client_id: String,
    pub payload: String,
    /// Re-sends made so far; 0 after the first send
    pub attempts: u32,
    pub max_retries: u32,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pending_timer: Option<TimerHandle>,
}

impl DeliveryState {
    pub fn new(client_id: String, payload: String, attempts: u32, max_retries: u32) -> Self {
        Self {
            client_id,
            payload,
            attempts,
            max_retries,
            status: DeliveryStatus::Pending,
            created_at: Utc::now(),
            pending_timer: None,
        }
    }

    /// Install a timer, cancelling whichever one was armed before
    pub fn arm(&mut self, timer: TimerHandle) {
        self.cancel_timer();
        self.pending_timer = Some(timer);
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            timer.cancel();
        }
    }

    /// Forget the timer without aborting it (it has already elapsed)
    pub(crate) fn clear_fired_timer(&mut self) {
        self.pending_timer = None;
    }

    pub fn timer_generation(&self) -> Option<u64> {
        self.pending_timer.as_ref().map(TimerHandle::generation)
    }

    pub fn has_armed_timer(&self) -> bool {
        self.pending_timer.is_some()
    }

    /// Whether another live send is allowed once the current timer elapses
    pub fn has_attempts_left(&self) -> bool {
        self.attempts + 1 < self.max_retries
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            client_id: self.client_id.clone(),
            payload: self.payload.clone(),
            attempts: self.attempts,
            max_retries: self.max_retries,
            status: self.status,
            timer_armed: self.pending_timer.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Read-only copy of a DeliveryState
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub client_id: String,
    pub payload: String,
    pub attempts: u32,
    pub max_retries: u32,
    pub status: DeliveryStatus,
    pub timer_armed: bool,
    pub created_at: DateTime<Utc>,
}

/// Live table of in-flight messages keyed by message id.
///
/// Only Pending states live here; terminal states are removed on transition.
pub struct DeliveryTable {
    states: DashMap<String, DeliveryState>,
}

impl DeliveryTable {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, message_id: String, state: DeliveryState) -> Option<DeliveryState> {
        self.states.insert(message_id, state)
    }

    pub(crate) fn get_mut(&self, message_id: &str) -> Option<RefMut<'_, String, DeliveryState>> {
        self.states.get_mut(message_id)
    }

    pub(crate) fn remove(&self, message_id: &str) -> Option<DeliveryState> {
        self.states.remove(message_id).map(|(_, state)| state)
    }

    pub(crate) fn remove_if(
        &self,
        message_id: &str,
        f: impl FnOnce(&DeliveryState) -> bool,
    ) -> Option<DeliveryState> {
        self.states
            .remove_if(message_id, |_, state| f(state))
            .map(|(_, state)| state)
    }

    pub(crate) fn drain(&self) -> Vec<(String, DeliveryState)> {
        let keys: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.states.remove(&key))
            .collect()
    }

    pub fn get(&self, message_id: &str) -> Option<DeliverySnapshot> {
        self.states.get(message_id).map(|s| s.snapshot())
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.states.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of states with an armed timer
    pub fn armed_timers(&self) -> usize {
        self.states.iter().filter(|s| s.has_armed_timer()).count()
    }
}

impl Default for DeliveryTable {
    fn default() -> Self {
        Self::new()
    }
}
