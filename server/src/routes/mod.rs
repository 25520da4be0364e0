//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the built pages from `STATIC_DIR`, relays `/api`
//! and `/uploads` to the backend, and owns the session cookies. The route
//! guard wraps everything, including the static fallback, so protected pages
//! are never served to a visitor without a live token.

pub mod auth;
pub mod proxy;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{any, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::guard::route_guard;
use crate::state::AppState;

/// Photo uploads pass through the relay, so allow bodies well past axum's default.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

fn api_routes() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/registration/photos", any(proxy::registration_photos))
        .route("/api/uploads/{*path}", get(proxy::uploads))
        .route("/api/{*path}", any(proxy::api))
        .route("/uploads/{*path}", get(proxy::uploads))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
}

/// Full application: API routes, static pages, route guard and request tracing.
pub fn app(state: AppState) -> Router {
    let pages = ServeDir::new(&state.config.static_dir).append_index_html_on_directories(true);

    api_routes()
        .fallback_service(pages)
        .layer(middleware::from_fn_with_state(state.clone(), route_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
