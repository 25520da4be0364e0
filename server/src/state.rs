//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It is cheap to clone: the configuration is behind an `Arc` and the
//! forwarder shares one pooled HTTP client.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::forward::Forwarder;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub forwarder: Forwarder,
}

impl AppState {
    /// # Errors
    ///
    /// Returns an error if the forwarder's HTTP client cannot be built.
    pub fn new(config: ServerConfig) -> Result<Self, reqwest::Error> {
        let forwarder = Forwarder::new(&config.backend_url, config.backend_timeout)?;
        Ok(Self { config: Arc::new(config), forwarder })
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// `AppState` pointed at `backend_url`, with insecure cookies so tests
    /// can assert on plain attributes.
    #[must_use]
    pub fn test_app_state(backend_url: &str) -> AppState {
        let config = ServerConfig {
            backend_url: backend_url.to_owned(),
            static_dir: std::env::temp_dir().join("penzi-no-static-dir"),
            cookie_secure: false,
            ..ServerConfig::default()
        };
        AppState::new(config).expect("test state")
    }

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn spawn_stub(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub backend");
        let addr = listener.local_addr().expect("stub address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub backend failed");
        });
        format!("http://{addr}")
    }

    /// Base URL of a port nothing listens on.
    #[must_use]
    pub fn unreachable_backend() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}")
    }

    /// Collect a response body into a string.
    pub async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    /// All `Set-Cookie` header values on `response`.
    #[must_use]
    pub fn set_cookies(response: &axum::response::Response) -> Vec<String> {
        response
            .headers()
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect()
    }
}
