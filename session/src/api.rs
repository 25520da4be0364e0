//! Authenticated HTTP client for the Penzi backend.
//!
//! ARCHITECTURE
//! ============
//! Every authenticated call carries the stored access token as a bearer
//! credential. A `401` routes through the shared [`RefreshCoordinator`] and
//! the call is replayed exactly once with the token it produces. A second
//! `401` after a successful refresh surfaces as [`ApiError::Unauthorized`]
//! instead of looping.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx replies on ordinary calls become [`ApiError::Backend`] carrying
//! the backend's status and `message` so the calling view can render it.
//! Refresh failures have already cleared the session by the time they reach
//! the caller.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::refresh::{RefreshCoordinator, RefreshError, TokenRefresher};
use crate::store::{SessionStore, StoreError};
use crate::token::{self, DEFAULT_REFRESH_THRESHOLD_SECS};
use crate::types::{Match, RefreshResponse, SwipeAction, SwipeResult, User};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const AUTH_CACHE_TTL_SECS: u64 = 5 * 60;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Backend API root, including the `/api` prefix.
    pub base_url: String,
    /// Tokens closer than this to expiry are refreshed proactively.
    pub refresh_threshold_secs: i64,
    /// How long a cached profile satisfies a current-user check.
    pub auth_cache_ttl: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_owned(),
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            auth_cache_ttl: Duration::from_secs(AUTH_CACHE_TTL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ApiConfig {
    /// Defaults overridden by `PENZI_API_URL`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// As [`ApiConfig::from_env`], reading variables through `lookup`. A
    /// blank `PENZI_API_URL` keeps the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        match lookup("PENZI_API_URL").map(|raw| raw.trim().to_owned()).filter(|url| !url.is_empty()) {
            Some(url) => defaults.with_base_url(url),
            None => defaults,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend unreachable: {0}")]
    Network(String),
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("not authenticated")]
    Unauthorized,
    #[error("session refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("response body could not be decoded: {0}")]
    Decode(String),
    #[error("session storage failed: {0}")]
    Storage(#[from] StoreError),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    /// `true` when the error ended the session and the user must sign in again.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Refresh(_))
    }
}

/// Pull a human-readable message out of a backend error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned())
}

// =============================================================================
// REQUEST
// =============================================================================

/// A replayable backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Anonymous calls (login, register) carry no token and never refresh.
    pub authenticated: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, authenticated: true }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if `body` cannot be serialized.
    pub fn json(mut self, body: &impl Serialize) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?);
        Ok(self)
    }

    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

// =============================================================================
// REFRESHER
// =============================================================================

/// [`TokenRefresher`] backed by `POST {base}/auth/refresh`.
pub struct BackendRefresher {
    http: reqwest::Client,
    url: String,
}

impl BackendRefresher {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, url: join_url(base_url, "auth/refresh") }
    }
}

#[async_trait::async_trait]
impl TokenRefresher for BackendRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<String, RefreshError> {
        // The backend accepts the refresh token as a bearer credential; the
        // JSON body keeps older deployments working.
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(refresh_token)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(RefreshError::Rejected { status: status.as_u16(), message: error_message(status, &body) });
        }

        let parsed: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;
        if parsed.token.is_empty() {
            return Err(RefreshError::MalformedResponse("empty token".to_owned()));
        }
        Ok(parsed.token)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    coordinator: Arc<RefreshCoordinator>,
    refresher: Arc<dyn TokenRefresher>,
}

impl ApiClient {
    /// Build a client whose refreshes go to the backend's refresh endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: ApiConfig, store: SessionStore) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        let refresher = Arc::new(BackendRefresher::new(http.clone(), &config.base_url));
        Ok(Self { http, config, coordinator: Arc::new(RefreshCoordinator::new(store)), refresher })
    }

    /// Replace the refresher, e.g. with a different token endpoint.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        self.coordinator.store()
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Refresh ahead of time when the stored token is close to expiry.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure; the session is cleared in that case.
    pub async fn ensure_fresh(&self) -> Result<(), ApiError> {
        let Some(access) = self.store().access_token() else {
            return Ok(());
        };
        if token::needs_refresh(&access, self.config.refresh_threshold_secs) {
            tracing::debug!("access token near expiry; refreshing ahead of use");
            self.coordinator.request_or_join(self.refresher.as_ref()).await?;
        }
        Ok(())
    }

    /// Send `request`, refreshing and replaying once on `401`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Network`] when the backend cannot be reached
    /// - [`ApiError::Refresh`] when the token refresh fails
    /// - [`ApiError::Unauthorized`] when the replay is rejected again
    /// - [`ApiError::Backend`] for any other non-2xx status
    pub async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        if !request.authenticated {
            let resp = self.dispatch(request, None).await?;
            return ensure_success(resp).await;
        }

        let sent_with = self.store().access_token();
        let resp = self.dispatch(request, sent_with.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(resp).await;
        }

        tracing::debug!(path = %request.path, "request unauthorized; refreshing token");
        let fresh = match self.store().access_token() {
            // Another caller already refreshed after this request went out.
            Some(current) if sent_with.as_deref() != Some(current.as_str()) => current,
            _ => self.coordinator.request_or_join(self.refresher.as_ref()).await?,
        };

        let retried = self.dispatch(request, Some(&fresh)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(path = %request.path, "request unauthorized after token refresh");
            return Err(ApiError::Unauthorized);
        }
        ensure_success(retried).await
    }

    /// Send `request` and decode the JSON reply.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`], plus [`ApiError::Decode`] for an unexpected body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let resp = self.send(request).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<reqwest::Response, ApiError> {
        let url = join_url(&self.config.base_url, &request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "backend request failed");
            ApiError::Network(e.to_string())
        })
    }

    // =========================================================================
    // ENDPOINTS
    // =========================================================================

    /// `GET /auth/me`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.send_json(&ApiRequest::get("auth/me")).await
    }

    /// `GET /matching/potential`: profiles available for swiping.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn potential_matches(&self) -> Result<Vec<User>, ApiError> {
        self.send_json(&ApiRequest::get("matching/potential")).await
    }

    /// `POST /matching/swipe`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn swipe(&self, action: &SwipeAction) -> Result<SwipeResult, ApiError> {
        self.send_json(&ApiRequest::post("matching/swipe").json(action)?).await
    }

    /// `GET /matching/matches`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn matches(&self) -> Result<Vec<Match>, ApiError> {
        self.send_json(&ApiRequest::get("matching/matches")).await
    }

    /// `DELETE /matching/matches/{id}`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`].
    pub async fn unmatch(&self, match_id: &str) -> Result<(), ApiError> {
        self.send(&ApiRequest::delete(format!("matching/matches/{match_id}"))).await?;
        Ok(())
    }

    /// `POST /matching/block`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`].
    pub async fn block_user(&self, user_id: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("matching/block").json(&serde_json::json!({ "userId": user_id }))?;
        self.send(&request).await?;
        Ok(())
    }

    /// `POST /matching/report`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`].
    pub async fn report_user(&self, user_id: &str, reason: &str) -> Result<(), ApiError> {
        let request =
            ApiRequest::post("matching/report").json(&serde_json::json!({ "userId": user_id, "reason": reason }))?;
        self.send(&request).await?;
        Ok(())
    }

    /// `GET /admin/settings`: raw settings document for the admin dashboard.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn admin_settings(&self) -> Result<Value, ApiError> {
        self.send_json(&ApiRequest::get("admin/settings")).await
    }

    /// `GET /registration/photos`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn registration_photos(&self) -> Result<Value, ApiError> {
        self.send_json(&ApiRequest::get("registration/photos")).await
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Backend { status: status.as_u16(), message: error_message(status, &body) })
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
