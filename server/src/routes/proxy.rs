//! Backend relays for `/api/*` calls and uploaded media.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::forward::{ForwardMode, ForwardRequest, ForwardResponse, is_plain_subpath, json_error};
use crate::state::AppState;

fn inbound(method: Method, path: String, query: Option<String>, headers: HeaderMap, body: Bytes) -> ForwardRequest {
    ForwardRequest { path, query, method, headers, body }
}

/// `ANY /api/{*path}`: JSON relay to the same path on the backend. A path
/// that would escape `/api` once decoded is refused with `400`.
pub async fn api(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_plain_subpath(&path) {
        tracing::warn!(%path, "refusing api path outside /api");
        return json_error(StatusCode::BAD_REQUEST, "Invalid path");
    }
    let request = inbound(method, format!("/api/{path}"), query, headers, body);
    state.forwarder.forward(request, ForwardMode::Json).await.into_response()
}

/// `GET /api/registration/photos`: the backend requires a session here, so
/// anonymous calls are answered locally.
pub async fn registration_photos(
    State(state): State<AppState>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = inbound(method, "/api/registration/photos".to_owned(), query, headers, body);
    if request.authorization().is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "No token found");
    }
    state.forwarder.forward(request, ForwardMode::Json).await.into_response()
}

/// `GET /uploads/{*path}` and `GET /api/uploads/{*path}`: media from the
/// backend's `/uploads` tree. Paths that leave that tree get the same `404`
/// as a missing file.
pub async fn uploads(State(state): State<AppState>, Path(path): Path<String>, headers: HeaderMap) -> Response {
    if !is_plain_subpath(&path) {
        tracing::warn!(%path, "refusing media path outside /uploads");
        return ForwardResponse::media_not_found().into_response();
    }
    let mut request = ForwardRequest::new(Method::GET, format!("/uploads/{path}"));
    request.headers = headers;
    state.forwarder.forward(request, ForwardMode::Media).await.into_response()
}

#[cfg(test)]
#[path = "proxy_test.rs"]
mod tests;
