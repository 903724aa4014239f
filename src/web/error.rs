use crate::error::WebhookError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, label, message) = match self.0.downcast_ref::<WebhookError>() {
            Some(WebhookError::Validation(msg)) => (StatusCode::BAD_REQUEST, "Bad Request", msg.clone()),
            Some(e @ WebhookError::NotFound(_)) => (StatusCode::NOT_FOUND, "Not Found", e.to_string()),
            Some(WebhookError::Conflict(msg)) => (StatusCode::CONFLICT, "Conflict", msg.clone()),
            _ => {
                tracing::error!("Application error: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": label,
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
