use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::shortener::{create_short_url, resolve_short_url};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Short URLs
        .route("/url", post(create_short_url))
        // Catch-all for codes; static routes above take precedence
        .route("/{code}", get(resolve_short_url))
}
