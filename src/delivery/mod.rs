//! Live delivery with retry and broker fallback.
//!
//! A message is sent over the client's WebSocket channel and a retry timer is
//! armed with exponential backoff. An acknowledgment from the addressed client
//! cancels the timer; when the attempts run out, or the client has no live
//! channel, the payload goes to the fallback broker instead.
//!
//! Per-message lifecycle:
//!
//! ```text
//! Pending --timer, attempts left--> Pending (resend, new timer)
//! Pending --matching ack----------> Acknowledged (removed)
//! Pending --timer, none left------> Exhausted (fallback publish, removed)
//! ```

mod ack;
mod coordinator;
mod scheduler;
mod service;
mod state;
mod stats;

pub use ack::{AckOutcome, AcknowledgmentHandler};
pub use coordinator::{DeliveryCommand, DeliveryCoordinator, DeliveryOutcome, FallbackReason};
pub use scheduler::{RetryDecision, RetryPolicy, RetryScheduler, TimerFired};
pub use service::{DeliveryError, DeliveryService};
pub use state::{DeliverySnapshot, DeliveryState, DeliveryStatus, DeliveryTable, TimerHandle};
pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
