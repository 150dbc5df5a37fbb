mod index;
mod offer;
mod sessions;
mod settings;

use crate::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Viewer page
        .route("/", get(index::index))
        // Health check
        .route("/health", get(|| async { "OK" }))
        // WebRTC signaling
        .route("/offer", post(offer::offer))
        .route("/ice-servers", get(crate::rtc::get_ice_servers))
        // Live filter thresholds
        .route("/settings", get(settings::get_settings).post(settings::update_settings))
        // Session management
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}", delete(sessions::close_session))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
