//! Navigation gate for protected pages.
//!
//! DESIGN
//! ======
//! The decision is a pure function of the path, the `token` cookie and the
//! clock so it can be tested without a router. The middleware wrapper only
//! applies to page navigations; API and asset paths bypass it and
//! authenticate through the forwarder instead.
//!
//! TRADE-OFFS
//! ==========
//! Token validity is checked by decoding the payload only. Signatures are
//! not verified here; a forged token passes the gate but is rejected by the
//! backend on the first data call.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use session::store::{LOGIN_PATH, TOKEN_KEY};
use session::token;

use crate::routes::auth::expire_session_cookies;
use crate::state::AppState;

/// Reachable without a session.
const PUBLIC_PREFIXES: &[&str] = &[
    "/login",
    "/register",
    "/auth",
    "/api/auth/login",
    "/api/auth/register",
    "/api/uploads",
    "/uploads",
];

/// Not page navigations; never gated.
const BYPASS_PREFIXES: &[&str] = &["/api/", "/pkg/", "/assets/", "/_next/"];
const BYPASS_EXACT: &[&str] = &["/favicon.ico", "/healthz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
    /// The token is present but unusable; redirect and drop both cookies.
    RedirectToLoginAndClear,
}

#[must_use]
pub fn is_public(path: &str) -> bool {
    path == "/" || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

#[must_use]
pub fn bypasses_guard(path: &str) -> bool {
    BYPASS_EXACT.contains(&path) || BYPASS_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Decide whether a navigation to `path` may proceed. `now` is epoch seconds.
#[must_use]
pub fn decide(path: &str, token: Option<&str>, now: i64) -> GuardDecision {
    if is_public(path) {
        return GuardDecision::Allow;
    }
    match token.filter(|t| !t.is_empty()) {
        None => GuardDecision::RedirectToLogin,
        Some(t) if token::is_valid_at(t, now) => GuardDecision::Allow,
        Some(_) => GuardDecision::RedirectToLoginAndClear,
    }
}

/// Middleware applying [`decide`] to every page navigation.
pub async fn route_guard(State(state): State<AppState>, jar: CookieJar, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    if bypasses_guard(&path) {
        return next.run(request).await;
    }

    let token = jar.get(TOKEN_KEY).map(Cookie::value);
    match decide(&path, token, token::now_secs()) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::RedirectToLogin => {
            tracing::debug!(%path, "no session; redirecting to login");
            Redirect::temporary(LOGIN_PATH).into_response()
        }
        GuardDecision::RedirectToLoginAndClear => {
            tracing::info!(%path, "expired or malformed token; clearing session cookies");
            let jar = expire_session_cookies(jar, &state.config);
            (jar, Redirect::temporary(LOGIN_PATH)).into_response()
        }
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
