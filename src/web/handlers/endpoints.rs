use super::{json_envelope, json_single, paginate, PaginationParams};
use crate::models::{EndpointUpdate, NewEndpoint};
use crate::services::{deliveries, endpoints};
use crate::web::error::AppResult;
use crate::web::extractors::Tenant;
use crate::web::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ListEndpointsParams {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Deserialize, Default)]
pub struct TestEndpointRequest {
    pub sample_payload: Option<serde_json::Value>,
}

/// GET /api/v1/endpoints
pub async fn list_endpoints(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Query(params): Query<ListEndpointsParams>,
) -> AppResult<Response> {
    let list = endpoints::list_endpoints(&state.db, &org, params.active_only)?;
    let total = list.len() as i64;
    let per_page = list.len().max(1);
    Ok(json_envelope(serde_json::to_value(&list)?, total, 1, per_page).into_response())
}

/// POST /api/v1/endpoints
pub async fn create_endpoint(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Json(new): Json<NewEndpoint>,
) -> AppResult<Response> {
    let created = endpoints::create_endpoint(&state.db, &org, new)?;
    Ok((StatusCode::CREATED, json_single(serde_json::to_value(&created)?)).into_response())
}

/// GET /api/v1/endpoints/:id
pub async fn get_endpoint(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let endpoint = endpoints::get_endpoint(&state.db, &id, &org)?;
    Ok(json_single(serde_json::to_value(&endpoint)?).into_response())
}

/// PATCH /api/v1/endpoints/:id
pub async fn update_endpoint(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
    Json(update): Json<EndpointUpdate>,
) -> AppResult<Response> {
    let endpoint = endpoints::update_endpoint(&state.db, &id, &org, update)?;
    Ok(json_single(serde_json::to_value(&endpoint)?).into_response())
}

/// DELETE /api/v1/endpoints/:id
pub async fn delete_endpoint(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
) -> AppResult<Response> {
    endpoints::delete_endpoint(&state.db, &id, &org)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /api/v1/endpoints/:id/secret
pub async fn regenerate_secret(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let rotated = endpoints::regenerate_secret(&state.db, &id, &org)?;
    Ok(json_single(serde_json::to_value(&rotated)?).into_response())
}

/// POST /api/v1/endpoints/:id/test
pub async fn test_endpoint(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
    body: Option<Json<TestEndpointRequest>>,
) -> AppResult<Response> {
    let endpoint = endpoints::get_endpoint(&state.db, &id, &org)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let result = state
        .dispatcher
        .test_endpoint(&endpoint, request.sample_payload)
        .await?;
    Ok(json_single(serde_json::to_value(&result)?).into_response())
}

/// GET /api/v1/endpoints/:id/deliveries
pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Tenant(org): Tenant,
    Path(id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Response> {
    let (page, per_page, offset) = paginate(
        params.page,
        params.per_page,
        state.config.api.default_page_size,
        state.config.api.max_page_size,
    );
    let result = deliveries::list_deliveries(&state.db, &id, &org, per_page, offset)?;
    Ok(json_envelope(serde_json::to_value(&result.deliveries)?, result.total, page, per_page).into_response())
}
