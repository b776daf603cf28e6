//! API router setup

use crate::handlers::{self, AppState};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/models",
            get(handlers::list_models).post(handlers::register_model),
        )
        .route(
            "/api/v1/models/{id}",
            get(handlers::get_model).delete(handlers::delete_model),
        )
        .route(
            "/api/v1/devices",
            get(handlers::list_devices).post(handlers::create_device),
        )
        .route(
            "/api/v1/devices/{id}",
            get(handlers::get_device).delete(handlers::delete_device),
        )
        .route("/api/v1/devices/{id}/start", post(handlers::start_device))
        .route("/api/v1/devices/{id}/stop", post(handlers::stop_device))
        .route("/api/v1/devices/{id}/metrics", get(handlers::device_metrics))
        .route("/api/v1/devices/{id}/bind", post(handlers::bind_device))
        .route("/api/v1/devices/{id}/unbind", post(handlers::unbind_device))
        .route("/api/v1/devices/{id}/binding", get(handlers::get_binding))
        .route("/api/v1/groups", post(handlers::create_group))
        .route("/api/v1/groups/{id}", delete(handlers::delete_group))
        .route("/api/v1/groups/{id}/start", post(handlers::start_group))
        .route("/api/v1/groups/{id}/stop", post(handlers::stop_group))
        .route("/api/v1/groups/{id}/dropout", post(handlers::dropout_group))
        .route("/api/v1/webhooks/{id}", post(handlers::receive_webhook))
        .route("/api/v1/stats", get(handlers::stats))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
