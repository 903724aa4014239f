use super::handlers;
use super::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::events::health))
        .route("/api/v1/event-types", get(handlers::events::list_event_types))
        .route("/api/v1/events", post(handlers::events::publish_event))
        .route(
            "/api/v1/endpoints",
            get(handlers::endpoints::list_endpoints).post(handlers::endpoints::create_endpoint),
        )
        .route(
            "/api/v1/endpoints/:id",
            get(handlers::endpoints::get_endpoint)
                .patch(handlers::endpoints::update_endpoint)
                .delete(handlers::endpoints::delete_endpoint),
        )
        .route(
            "/api/v1/endpoints/:id/secret",
            post(handlers::endpoints::regenerate_secret),
        )
        .route(
            "/api/v1/endpoints/:id/test",
            post(handlers::endpoints::test_endpoint),
        )
        .route(
            "/api/v1/endpoints/:id/deliveries",
            get(handlers::endpoints::list_deliveries),
        )
        .route("/api/v1/deliveries/:id", get(handlers::deliveries::get_delivery))
        .route(
            "/api/v1/deliveries/:id/retry",
            post(handlers::deliveries::retry_delivery),
        )
}
