use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::delivery::{DeliveryCoordinator, DeliveryService, RetryPolicy};
use crate::fallback::FallbackPublisher;
use crate::shortener::ShortUrlStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub delivery: DeliveryService,
    pub short_urls: Arc<ShortUrlStore>,
    pub fallback_backend: &'static str,
    pub shutdown: broadcast::Sender<()>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the components together and start the delivery coordinator.
    ///
    /// Returns the coordinator task handle; the coordinator and every open
    /// WebSocket stop when `shutdown` fires.
    pub fn new(
        settings: Settings,
        publisher: Arc<dyn FallbackPublisher>,
        shutdown: broadcast::Sender<()>,
    ) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let fallback_backend = publisher.backend();

        let (coordinator, timers) =
            DeliveryCoordinator::new(RetryPolicy::from(&settings.delivery), registry, publisher);
        let (delivery, handle) = DeliveryService::spawn(
            coordinator,
            timers,
            settings.delivery.command_buffer,
            shutdown.subscribe(),
        );

        let short_urls = Arc::new(ShortUrlStore::new(settings.shortener.code_length));

        let state = Self {
            settings: Arc::new(settings),
            delivery,
            short_urls,
            fallback_backend,
            shutdown,
            started_at: Instant::now(),
        };
        (state, handle)
    }
}
