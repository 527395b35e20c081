//! Live duplex channels keyed by client id
//!
//! The registry maps each client to at most one channel. A newer connection for
//! the same client replaces the older one, and lookups never return a handle
//! that has been unregistered.

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::RegistryStats;
pub use types::ClientChannel;
