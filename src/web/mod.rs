mod error;
mod extractors;
mod handlers;
mod routes;
mod state;

pub use extractors::ORGANIZATION_HEADER;
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Test sends wait on the receiver, so the API timeout sits above the
/// delivery timeout.
const API_TIMEOUT_HEADROOM: Duration = Duration::from_secs(15);

pub fn router(state: Arc<AppState>) -> Router {
    let timeout = state.config.delivery.request_timeout() + API_TIMEOUT_HEADROOM;

    Router::new()
        .merge(routes::api_routes())
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(state: Arc<AppState>, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
