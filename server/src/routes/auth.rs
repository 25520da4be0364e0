//! Auth routes: sign-in relays that manage the session cookies.
//!
//! The backend issues tokens in JSON bodies. These handlers forward the
//! call, and on success mirror the tokens into the `token` and
//! `refreshToken` cookies the route guard and forwarder read. Cookies are
//! not `HttpOnly`: page scripts read the token to attach bearer headers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use session::store::{REFRESH_TOKEN_KEY, TOKEN_KEY};
use time::{Duration, OffsetDateTime};

use crate::config::ServerConfig;
use crate::forward::{ForwardMode, ForwardRequest, ForwardResponse, json_error};
use crate::state::AppState;

// =============================================================================
// COOKIES
// =============================================================================

fn session_cookie(name: &'static str, value: String, config: &ServerConfig) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Strict)
        .secure(config.cookie_secure)
        .max_age(Duration::days(config.token_cookie_days))
        .build()
}

fn expired_cookie(name: &'static str, config: &ServerConfig) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .same_site(SameSite::Strict)
        .secure(config.cookie_secure)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Add expired `token` and `refreshToken` cookies to `jar`.
pub(crate) fn expire_session_cookies(jar: CookieJar, config: &ServerConfig) -> CookieJar {
    jar.add(expired_cookie(TOKEN_KEY, config))
        .add(expired_cookie(REFRESH_TOKEN_KEY, config))
}

/// Tokens in a login, register or refresh reply. Only `token` is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTokens {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn issued_tokens(response: &ForwardResponse) -> Option<IssuedTokens> {
    if !response.is_success() {
        return None;
    }
    serde_json::from_slice::<IssuedTokens>(&response.body)
        .ok()
        .filter(|t| !t.token.is_empty())
}

fn relay(path: &str, headers: HeaderMap, body: Bytes) -> ForwardRequest {
    ForwardRequest { headers, body, ..ForwardRequest::new(Method::POST, path) }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/auth/login`: forward credentials; on success set both cookies.
pub async fn login(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap, body: Bytes) -> Response {
    sign_in(&state, jar, relay("/api/auth/login", headers, body)).await
}

/// `POST /api/auth/register`: as login.
pub async fn register(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap, body: Bytes) -> Response {
    sign_in(&state, jar, relay("/api/auth/register", headers, body)).await
}

async fn sign_in(state: &AppState, jar: CookieJar, request: ForwardRequest) -> Response {
    let path = request.path.clone();
    let response = state.forwarder.forward(request, ForwardMode::Json).await;
    let Some(tokens) = issued_tokens(&response) else {
        tracing::debug!(%path, status = %response.status, "sign-in not accepted");
        return response.into_response();
    };

    let mut jar = jar.add(session_cookie(TOKEN_KEY, tokens.token, &state.config));
    if let Some(refresh) = tokens.refresh_token.filter(|r| !r.is_empty()) {
        jar = jar.add(session_cookie(REFRESH_TOKEN_KEY, refresh, &state.config));
    }
    tracing::info!(%path, "session cookies issued");
    (jar, response).into_response()
}

/// `POST /api/auth/refresh`: exchange the `refreshToken` cookie for a new
/// `token` cookie. A rejected refresh expires both cookies.
pub async fn refresh(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap) -> Response {
    let Some(refresh_token) = jar.get(REFRESH_TOKEN_KEY).map(|c| c.value().to_owned()).filter(|v| !v.is_empty())
    else {
        return json_error(StatusCode::UNAUTHORIZED, "No refresh token found");
    };

    let mut request = ForwardRequest::new(Method::POST, "/api/auth/refresh");
    if let Some(agent) = headers.get(header::USER_AGENT) {
        request.headers.insert(header::USER_AGENT, agent.clone());
    }
    request.headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
    match header::HeaderValue::from_str(&format!("Bearer {refresh_token}")) {
        Ok(value) => {
            request.headers.insert(header::AUTHORIZATION, value);
        }
        Err(_) => return json_error(StatusCode::UNAUTHORIZED, "No refresh token found"),
    }
    request.body = Bytes::from(json!({ "refreshToken": refresh_token }).to_string());

    let response = state.forwarder.forward(request, ForwardMode::Json).await;
    if let Some(tokens) = issued_tokens(&response) {
        tracing::debug!("access token cookie refreshed");
        let jar = jar.add(session_cookie(TOKEN_KEY, tokens.token, &state.config));
        return (jar, response).into_response();
    }

    if response.status.is_client_error() {
        tracing::info!(status = %response.status, "refresh rejected; expiring session cookies");
        let jar = expire_session_cookies(jar, &state.config);
        return (jar, response).into_response();
    }
    response.into_response()
}

/// `POST /api/auth/logout`: expire both cookies.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    (expire_session_cookies(jar, &state.config), StatusCode::NO_CONTENT).into_response()
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
