// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer
pub mod connection_manager;
pub mod delivery;
pub mod fallback;
pub mod shortener;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;
