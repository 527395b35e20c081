//! Short URL endpoints.
//!
//! Creating a short URL also pushes it to the requesting client, live over
//! its WebSocket or through the broker fallback.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryError;
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUrlQuery {
    pub url: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUrlResponse {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveUrlResponse {
    pub url: String,
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("{} is required", name))),
    }
}

/// POST /url?url=..&clientId=..
#[tracing::instrument(name = "api.create_short_url", skip_all)]
pub async fn create_short_url(
    State(state): State<AppState>,
    Query(query): Query<CreateUrlQuery>,
) -> Result<(StatusCode, Json<CreateUrlResponse>)> {
    let url = required(query.url, "url")?;
    let client_id = required(query.client_id, "clientId")?;

    let code = state.short_urls.shorten(&url);
    let shortened = format!(
        "{}/{}",
        state.settings.shortener.base_url.trim_end_matches('/'),
        code
    );

    state
        .delivery
        .initiate_delivery(&client_id, &code, &shortened)
        .await
        .map_err(|e| match e {
            DeliveryError::EmptyField(field) => {
                AppError::Validation(format!("{} must not be empty", field))
            }
            DeliveryError::Stopped => AppError::Unavailable(e.to_string()),
        })?;

    tracing::info!(client_id = %client_id, code = %code, "Short URL created");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateUrlResponse {
            message: "Processing your request.".to_string(),
            code,
        }),
    ))
}

/// GET /{code}
pub async fn resolve_short_url(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<ResolveUrlResponse>)> {
    let url = state
        .short_urls
        .resolve(&code)
        .ok_or_else(|| AppError::NotFound(format!("Short URL '{}' not found", code)))?;

    Ok((StatusCode::ACCEPTED, Json(ResolveUrlResponse { url })))
}
