//! Request forwarding to the backend.
//!
//! ARCHITECTURE
//! ============
//! The browser only ever talks to this server. Calls under `/api` and media
//! under `/uploads` are relayed to the backend with the caller's bearer
//! credential, taken from the `Authorization` header or, failing that, the
//! `token` cookie.
//!
//! ERROR HANDLING
//! ==============
//! JSON calls pass the backend's status and body through untouched so the
//! client can act on `401`s and render backend messages. Media calls never
//! leak backend error bodies: any non-2xx becomes a plain `404`. A backend
//! that cannot be reached yields a fixed `500` in either mode.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use session::store::TOKEN_KEY;

const MEDIA_CACHE_CONTROL: &str = "public, max-age=31536000";
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    Json,
    Media,
}

/// An inbound call, already mapped onto its backend path.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Backend path with leading slash, e.g. `/api/matching/matches`.
    pub path: String,
    pub query: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { path: path.into(), query: None, method, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Bearer credential for the backend: the inbound `Authorization`
    /// header, else the `token` cookie.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        if let Some(value) = self.headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if !value.trim().is_empty() {
                return Some(value.to_owned());
            }
        }
        CookieJar::from_headers(&self.headers)
            .get(TOKEN_KEY)
            .map(|c| c.value().to_owned())
            .filter(|v| !v.is_empty())
            .map(|token| format!("Bearer {token}"))
    }
}

#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardResponse {
    fn json_failure() -> Self {
        let body = json!({ "error": "Internal server error" }).to_string();
        Self::with_type(StatusCode::INTERNAL_SERVER_ERROR, "application/json", body)
    }

    /// The generic media miss. Carries no cache header.
    pub(crate) fn media_not_found() -> Self {
        Self::with_type(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "File not found")
    }

    fn with_type(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { status, headers, body: body.into() }
    }

    /// `true` for 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for ForwardResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Error body used by routes that answer without reaching the backend.
pub(crate) fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Whether a decoded wildcard capture stays inside the route it was captured
/// under once appended to a backend path.
///
/// Segments must be non-empty and must not be `.` or `..`. Segments holding
/// a decoded `?`, `#`, `%` or `\` are refused as well.
pub(crate) fn is_plain_subpath(rest: &str) -> bool {
    !rest.is_empty()
        && rest
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains(['?', '#', '%', '\\']))
}

// =============================================================================
// FORWARDER
// =============================================================================

#[derive(Clone)]
pub struct Forwarder {
    http: reqwest::Client,
    base_url: Arc<str>,
}

impl Forwarder {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: Arc::from(base_url.trim_end_matches('/')) })
    }

    fn target(&self, request: &ForwardRequest) -> String {
        let mut url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Relay `request` to the backend and shape the reply for `mode`.
    pub async fn forward(&self, request: ForwardRequest, mode: ForwardMode) -> ForwardResponse {
        let url = self.target(&request);
        let mut builder = self.http.request(request.method.clone(), &url);
        if let Some(auth) = request.authorization() {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        for name in [header::USER_AGENT, header::CONTENT_TYPE] {
            if let Some(value) = request.headers.get(&name) {
                builder = builder.header(name, value.clone());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let upstream = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(%url, error = %e, "backend unreachable");
                return failure(mode);
            }
        };

        let status = upstream.status();
        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
        if mode == ForwardMode::Media && !status.is_success() {
            tracing::debug!(%url, %status, "media lookup failed upstream");
            return ForwardResponse::media_not_found();
        }

        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(%url, error = %e, "backend body read failed");
                return failure(mode);
            }
        };

        let mut headers = HeaderMap::new();
        match (mode, content_type) {
            (_, Some(ct)) => {
                headers.insert(header::CONTENT_TYPE, ct);
            }
            (ForwardMode::Media, None) => {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FALLBACK_MEDIA_TYPE));
            }
            (ForwardMode::Json, None) => {}
        }
        if mode == ForwardMode::Media {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(MEDIA_CACHE_CONTROL));
        }

        tracing::debug!(%url, %status, bytes = body.len(), "forwarded");
        ForwardResponse { status, headers, body }
    }
}

fn failure(mode: ForwardMode) -> ForwardResponse {
    match mode {
        ForwardMode::Json => ForwardResponse::json_failure(),
        ForwardMode::Media => ForwardResponse::with_type(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain; charset=utf-8",
            "Internal Server Error",
        ),
    }
}

#[cfg(test)]
#[path = "forward_test.rs"]
mod tests;
