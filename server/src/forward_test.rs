use super::*;
use crate::state::test_helpers::{spawn_stub, unreachable_backend};
use axum::extract::RawQuery;
use axum::routing::{get, post};

// =============================================================================
// STUB BACKEND
// =============================================================================

async fn echo_auth(headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).unwrap_or("none").to_owned();
    let agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("none").to_owned();
    Json(json!({ "auth": auth, "agent": agent, "query": query })).into_response()
}

async fn conflict() -> Response {
    (StatusCode::CONFLICT, Json(json!({ "message": "Email already registered" }))).into_response()
}

async fn echo_body(headers: HeaderMap, body: Bytes) -> Response {
    let ct = headers.get(header::CONTENT_TYPE).cloned().unwrap_or(HeaderValue::from_static("none"));
    (StatusCode::CREATED, [(header::CONTENT_TYPE, ct)], body).into_response()
}

async fn png() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], vec![0x89_u8, b'P', b'N', b'G']).into_response()
}

async fn untyped_blob() -> Response {
    let mut response = Bytes::from_static(b"raw").into_response();
    response.headers_mut().remove(header::CONTENT_TYPE);
    response
}

async fn missing_file() -> Response {
    (StatusCode::NOT_FOUND, "/srv/uploads/secret-path/abc.png not found").into_response()
}

async fn start_backend() -> Forwarder {
    let router = axum::Router::new()
        .route("/api/echo", get(echo_auth))
        .route("/api/conflict", post(conflict))
        .route("/api/body", post(echo_body))
        .route("/uploads/photo.png", get(png))
        .route("/uploads/blob", get(untyped_blob))
        .route("/uploads/abc.png", get(missing_file));
    let base = spawn_stub(router).await;
    Forwarder::new(&format!("{base}/"), Duration::from_secs(5)).expect("forwarder")
}

fn json_body(response: &ForwardResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).expect("json body")
}

// =============================================================================
// credentials
// =============================================================================

#[test]
fn authorization_prefers_header_over_cookie() {
    let mut request = ForwardRequest::new(Method::GET, "/api/echo");
    request.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
    request.headers.insert(header::COOKIE, HeaderValue::from_static("token=from-cookie"));
    assert_eq!(request.authorization().as_deref(), Some("Bearer from-header"));
}

#[test]
fn authorization_falls_back_to_token_cookie() {
    let mut request = ForwardRequest::new(Method::GET, "/api/echo");
    request.headers.insert(header::COOKIE, HeaderValue::from_static("refreshToken=r; token=from-cookie"));
    assert_eq!(request.authorization().as_deref(), Some("Bearer from-cookie"));
}

#[test]
fn authorization_absent_without_credentials() {
    let mut request = ForwardRequest::new(Method::GET, "/api/echo");
    request.headers.insert(header::COOKIE, HeaderValue::from_static("token="));
    assert!(request.authorization().is_none());
}

// =============================================================================
// json mode
// =============================================================================

#[tokio::test]
async fn json_forwards_credentials_agent_and_query() {
    let forwarder = start_backend().await;
    let mut request = ForwardRequest::new(Method::GET, "/api/echo");
    request.query = Some("page=2&limit=10".into());
    request.headers.insert(header::COOKIE, HeaderValue::from_static("token=abc"));
    request.headers.insert(header::USER_AGENT, HeaderValue::from_static("penzi-test"));

    let response = forwarder.forward(request, ForwardMode::Json).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = json_body(&response);
    assert_eq!(body["auth"], "Bearer abc");
    assert_eq!(body["agent"], "penzi-test");
    assert_eq!(body["query"], "page=2&limit=10");
}

#[tokio::test]
async fn json_passes_error_status_and_body_verbatim() {
    let forwarder = start_backend().await;

    let response = forwarder.forward(ForwardRequest::new(Method::POST, "/api/conflict"), ForwardMode::Json).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(json_body(&response)["message"], "Email already registered");
    assert_eq!(response.headers.get(header::CONTENT_TYPE).map(HeaderValue::as_bytes), Some(&b"application/json"[..]));
}

#[tokio::test]
async fn json_relays_body_and_content_type() {
    let forwarder = start_backend().await;
    let mut request = ForwardRequest::new(Method::POST, "api/body");
    request.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request.body = Bytes::from_static(br#"{"direction":"like"}"#);

    let response = forwarder.forward(request, ForwardMode::Json).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(&response.body[..], br#"{"direction":"like"}"#);
    assert_eq!(response.headers.get(header::CONTENT_TYPE).map(HeaderValue::as_bytes), Some(&b"application/json"[..]));
}

#[tokio::test]
async fn json_unreachable_backend_is_generic_500() {
    let forwarder = Forwarder::new(&unreachable_backend(), Duration::from_secs(5)).expect("forwarder");

    let response = forwarder.forward(ForwardRequest::new(Method::GET, "/api/echo"), ForwardMode::Json).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&response), json!({ "error": "Internal server error" }));
}

// =============================================================================
// media mode
// =============================================================================

#[tokio::test]
async fn media_success_is_cacheable() {
    let forwarder = start_backend().await;

    let response = forwarder.forward(ForwardRequest::new(Method::GET, "/uploads/photo.png"), ForwardMode::Media).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], &[0x89, b'P', b'N', b'G']);
    assert_eq!(response.headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(response.headers[header::CACHE_CONTROL], "public, max-age=31536000");
}

#[tokio::test]
async fn media_without_content_type_defaults_to_octet_stream() {
    let forwarder = start_backend().await;

    let response = forwarder.forward(ForwardRequest::new(Method::GET, "/uploads/blob"), ForwardMode::Media).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[header::CONTENT_TYPE], "application/octet-stream");
}

#[tokio::test]
async fn media_backend_error_is_generic_not_found() {
    let forwarder = start_backend().await;

    let response = forwarder.forward(ForwardRequest::new(Method::GET, "/uploads/abc.png"), ForwardMode::Media).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(&response.body[..], b"File not found");
    assert!(response.headers.get(header::CACHE_CONTROL).is_none());
}

#[tokio::test]
async fn media_unreachable_backend_is_plain_500() {
    let forwarder = Forwarder::new(&unreachable_backend(), Duration::from_secs(5)).expect("forwarder");

    let response = forwarder.forward(ForwardRequest::new(Method::GET, "/uploads/abc.png"), ForwardMode::Media).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&response.body[..], b"Internal Server Error");
}

#[test]
fn base_url_trailing_slash_is_trimmed() {
    let forwarder = Forwarder::new("http://backend:5000///", Duration::from_secs(1)).expect("forwarder");
    let mut request = ForwardRequest::new(Method::GET, "/api/x");
    request.query = Some(String::new());
    assert_eq!(forwarder.target(&request), "http://backend:5000/api/x");
}

// =============================================================================
// wildcard captures
// =============================================================================

#[test]
fn plain_subpaths_are_accepted() {
    for rest in ["p1.jpg", "photos/2024/p1.jpg", "matching/matches/7", "a.b..c"] {
        assert!(is_plain_subpath(rest), "{rest}");
    }
}

#[test]
fn escaping_subpaths_are_refused() {
    let refused = [
        "",
        "..",
        ".",
        "../api/admin",
        "x/../../admin",
        "x//y",
        "x/",
        "matching?admin=1",
        "a#b",
        "%2e%2e/x",
        "..\\api",
    ];
    for rest in refused {
        assert!(!is_plain_subpath(rest), "{rest}");
    }
}
