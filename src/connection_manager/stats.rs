//! Registry statistics

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Clients with a live channel
    pub connected_clients: usize,
    /// Channels ever registered since startup
    pub total_registered: u64,
    /// Registrations that replaced an existing channel for the same client
    pub total_replaced: u64,
}
