use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::future::Future;
use std::pin::Pin;

pub const ORGANIZATION_HEADER: &str = "X-Organization-ID";

/// Tenant the request acts for. Identity is established upstream; this
/// only reads the organization it was scoped to.
pub struct Tenant(pub String);

pub struct MissingTenant;

impl IntoResponse for MissingTenant {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": "Bad Request",
            "message": format!("missing {} header", ORGANIZATION_HEADER),
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = MissingTenant;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> Pin<Box<dyn Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let org = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Box::pin(async move { org.map(Tenant).ok_or(MissingTenant) })
    }
}
