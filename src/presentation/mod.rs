// Presentation layer - HTTP and WebSocket routes
pub mod app_state;
pub mod handlers;
pub mod socket;

use crate::infrastructure::websocket::ClientRegistry;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{get_dictionary, get_history, health_check, list_dictionaries};
use crate::presentation::socket::telemetry_socket;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/dictionaries", get(list_dictionaries))
        .route("/dictionaries/:key", get(get_dictionary))
        .route("/history/:key/:measurement", get(get_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn socket_router(registry: Arc<ClientRegistry>) -> Router {
    Router::new()
        .route("/", get(telemetry_socket))
        .with_state(registry)
}
