use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::CONNECTED_CLIENTS;
use crate::websocket::ServerMessage;

use super::{ClientChannel, RegistryStats};

/// Tracks which clients currently have a live channel
pub struct ConnectionRegistry {
    /// client_id -> ClientChannel
    channels: DashMap<String, Arc<ClientChannel>>,
    total_registered: AtomicU64,
    total_replaced: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            total_registered: AtomicU64::new(0),
            total_replaced: AtomicU64::new(0),
        }
    }

    /// Register a channel for a client, replacing any previous one
    pub fn register(
        &self,
        client_id: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Arc<ClientChannel> {
        let client_id = client_id.into();
        let channel = Arc::new(ClientChannel::new(client_id.clone(), sender));

        let previous = self.channels.insert(client_id, channel.clone());
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        CONNECTED_CLIENTS.set(self.channels.len() as i64);

        if let Some(previous) = previous {
            self.total_replaced.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                client_id = %channel.client_id,
                connection_id = %channel.id,
                replaced_connection_id = %previous.id,
                "Channel registered, replacing previous connection"
            );
        } else {
            tracing::info!(
                client_id = %channel.client_id,
                connection_id = %channel.id,
                "Channel registered"
            );
        }

        channel
    }

    /// Remove the channel for a client. Idempotent.
    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.channels.remove(client_id).is_some();
        if removed {
            CONNECTED_CLIENTS.set(self.channels.len() as i64);
            tracing::info!(client_id = %client_id, "Channel unregistered");
        }
        removed
    }

    /// Remove the channel for a client only if it is still the given connection.
    ///
    /// A socket that closes after a newer connection took over must not evict
    /// the newer one.
    pub fn unregister_connection(&self, client_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .channels
            .remove_if(client_id, |_, channel| channel.id == connection_id)
            .is_some();

        if removed {
            CONNECTED_CLIENTS.set(self.channels.len() as i64);
            tracing::info!(
                client_id = %client_id,
                connection_id = %connection_id,
                "Channel unregistered"
            );
        } else {
            tracing::debug!(
                client_id = %client_id,
                connection_id = %connection_id,
                "Closed connection was already replaced or removed"
            );
        }
        removed
    }

    pub fn lookup(&self, client_id: &str) -> Option<Arc<ClientChannel>> {
        self.channels.get(client_id).map(|c| c.clone())
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.channels.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connected_clients: self.channels.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_replaced: self.total_replaced.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
