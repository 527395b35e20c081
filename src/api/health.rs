//! Health check and statistics endpoints.

use axum::{
    extract::State,
    Json,
};
use serde::Serialize;

use crate::connection_manager::RegistryStats;
use crate::delivery::DeliveryStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_clients: usize,
    pub pending_deliveries: usize,
    pub fallback: FallbackHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct FallbackHealthResponse {
    pub backend: String,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: RegistryStats,
    pub delivery: DeliveryStatsSnapshot,
    pub short_urls: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_clients: state.delivery.registry().len(),
        pending_deliveries: state.delivery.table().len(),
        fallback: FallbackHealthResponse {
            backend: state.fallback_backend.to_string(),
            topic: state.settings.broker.topic.clone(),
        },
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.delivery.registry().stats(),
        delivery: state.delivery.stats(),
        short_urls: state.short_urls.len(),
    })
}
