use super::json_single;
use crate::services::deliveries;
use crate::web::error::AppResult;
use crate::web::extractors::Tenant;
use crate::web::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// GET /api/v1/deliveries/:id
pub async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let delivery = deliveries::get_delivery(&state.db, &id, &org)?;
    Ok(json_single(serde_json::to_value(&delivery)?).into_response())
}

/// POST /api/v1/deliveries/:id/retry
pub async fn retry_delivery(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let delivery = state.dispatcher.replay(&id, &org).await?;
    Ok(json_single(serde_json::to_value(&delivery)?).into_response())
}
