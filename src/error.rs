use thiserror::Error;

/// Errors surfaced by the endpoint registry, the delivery store and the
/// publish path.
///
/// Delivery attempts never produce this type for HTTP problems; those are
/// [`crate::services::dispatcher::AttemptFailure`] and only ever land in the
/// delivery log.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl WebhookError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for failures of the backing store rather than of the caller's input.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Pool(_) | Self::Encoding(_))
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
