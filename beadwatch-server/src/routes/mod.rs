use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    health_handler, list_watchers_handler, refresh_watchers_handler,
    websocket_handler,
};
use crate::infra::app_state::AppState;

pub const HEALTH: &str = "/health";
pub const WATCHERS: &str = "/api/watchers";
pub const WATCHERS_REFRESH: &str = "/api/watchers/refresh";

/// Build the full application router: status routes, the WebSocket upgrade
/// at the configured path, CORS and request tracing.
pub fn create_app(state: AppState) -> Router {
    let ws_path = state.config().server.ws_path.clone();

    Router::new()
        .route(HEALTH, get(health_handler))
        .route(WATCHERS, get(list_watchers_handler))
        .route(WATCHERS_REFRESH, post(refresh_watchers_handler))
        .route(&ws_path, get(websocket_handler))
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let cors = &state.config().cors;
    if cors.is_wildcard_included() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
