use super::json_single;
use crate::models::EVENT_TYPES;
use crate::web::error::AppResult;
use crate::web::extractors::Tenant;
use crate::web::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct PublishRequest {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// GET /health
pub async fn health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// GET /api/v1/event-types
pub async fn list_event_types() -> Response {
    json_single(serde_json::json!(EVENT_TYPES)).into_response()
}

/// POST /api/v1/events
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Json(request): Json<PublishRequest>,
) -> AppResult<Response> {
    let receipt = state.publisher.publish(&request.event_type, &org, request.data)?;
    let data = serde_json::json!({
        "event_id": receipt.event_id,
        "event_type": receipt.event_type,
        "scheduled": receipt.deliveries.len(),
    });
    Ok((StatusCode::ACCEPTED, json_single(data)).into_response())
}
