use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use super::{
    handlers,
    middleware::{auth_middleware, track_device},
};
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Device routes (protected)
    let device_routes = Router::new()
        .route("/", get(handlers::devices::get_devices))
        .route("/current", get(handlers::devices::get_current_device))
        .route("/status", get(handlers::devices::status_summary))
        .route("/fingerprint", post(handlers::devices::fingerprint_device))
        .route("/:id", get(handlers::devices::get_device))
        .route("/:id", delete(handlers::devices::remove_device))
        .route("/:id/verify", post(handlers::devices::verify_device))
        .route("/:id/hijack", post(handlers::devices::hijack_device))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Session routes (protected)
    let session_routes = Router::new()
        .route("/", get(handlers::sessions::get_sessions))
        .route("/refresh", post(handlers::sessions::refresh_session))
        .route("/current", get(handlers::sessions::get_current_session))
        .route("/current", delete(handlers::sessions::end_current_session))
        .route(
            "/current/unlock",
            post(handlers::sessions::unlock_current_session),
        )
        .route("/:id", delete(handlers::sessions::end_session))
        .route("/:id/block", post(handlers::sessions::block_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Two-factor routes (protected)
    let two_factor_routes = Router::new()
        .route("/enable", post(handlers::security::enable_two_factor))
        .route("/disable", post(handlers::security::disable_two_factor))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Every API request runs through device tracking, authenticated or not.
    Router::new()
        .nest("/devices", device_routes)
        .nest("/sessions", session_routes)
        .nest("/2fa", two_factor_routes)
        .layer(middleware::from_fn_with_state(state.clone(), track_device))
        .with_state(state)
}
