//! Fixtures shared by this crate's tests and downstream crates.
//!
//! Enabled with the `test-util` feature.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

/// Build an unsigned JWT-shaped token around `claims`.
#[must_use]
pub fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Token for `sub` expiring at `exp` (epoch seconds).
#[must_use]
pub fn token_expiring_at(sub: &str, exp: i64) -> String {
    unsigned_token(&json!({ "sub": sub, "exp": exp, "type": "access" }))
}

/// Token for `sub` expiring `secs` from now (negative for the past).
#[must_use]
pub fn token_expiring_in(sub: &str, secs: i64) -> String {
    token_expiring_at(sub, crate::token::now_secs() + secs)
}

/// Serve `router` on an ephemeral local port and return its base URL.
#[cfg(test)]
pub(crate) async fn spawn_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub backend");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub backend failed");
    });
    format!("http://{addr}")
}
