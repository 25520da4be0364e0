//! Sign-in flows layered over [`ApiClient`] and the session store.
//!
//! Login stores both tokens plus the returned profile. Registration does not
//! sign the user in; they are expected to log in afterwards. Current-user
//! checks are served from the cached profile while the last confirmed check
//! is younger than the configured TTL, so page loads avoid a round trip.

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::store::SessionStore;
use crate::token::now_millis;
use crate::types::{AuthResponse, LoginCredentials, ProfileUpdate, RegisterCredentials, User};

pub struct AuthSession {
    api: ApiClient,
}

impl AuthSession {
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn store(&self) -> &SessionStore {
        self.api.store()
    }

    /// `POST /auth/login`, then persist tokens and profile.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Backend`] with the backend's message for rejected
    /// credentials, or a transport/decode error.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, ApiError> {
        let request = ApiRequest::post("auth/login").json(credentials)?.anonymous();
        let resp: AuthResponse = self.api.send_json(&request).await?;

        let store = self.store();
        store.set_tokens(&resp.token, &resp.refresh_token)?;
        if let Err(e) = store.set_cached_user(&resp.user) {
            tracing::warn!(error = %e, "profile cache write failed after login");
        }
        if let Err(e) = store.touch_auth_check(now_millis()) {
            tracing::warn!(error = %e, "auth check timestamp write failed after login");
        }
        tracing::info!(user_id = %resp.user.id, "login succeeded");
        Ok(resp.user)
    }

    /// `POST /auth/register`. The new account is not signed in.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Backend`] for validation or conflict replies.
    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<User, ApiError> {
        let request = ApiRequest::post("auth/register").json(credentials)?.anonymous();
        let resp: AuthResponse = self.api.send_json(&request).await?;
        tracing::info!(user_id = %resp.user.id, "registration succeeded");
        Ok(resp.user)
    }

    /// Drop the local session. No navigation; the caller decides where to go.
    pub fn logout(&self) {
        self.store().clear();
        tracing::info!("logged out");
    }

    /// Resolve the signed-in user.
    ///
    /// Returns `None` when there is no session or the backend no longer
    /// accepts it; in the latter case the session is cleared. Network
    /// failures keep the session and fall back to the cached profile.
    pub async fn check_auth(&self) -> Option<User> {
        let store = self.store();
        store.access_token()?;

        let now = now_millis();
        let ttl = i64::try_from(self.api.config().auth_cache_ttl.as_millis()).unwrap_or(i64::MAX);
        if let (Some(user), Some(checked)) = (store.cached_user(), store.last_auth_check()) {
            if now.saturating_sub(checked) < ttl {
                tracing::debug!("serving current user from cache");
                return Some(user);
            }
        }

        let fetched = match self.api.ensure_fresh().await {
            Ok(()) => self.api.current_user().await,
            Err(e) => Err(e),
        };
        match fetched {
            Ok(user) => {
                if let Err(e) = store.set_cached_user(&user) {
                    tracing::warn!(error = %e, "profile cache write failed");
                }
                if let Err(e) = store.touch_auth_check(now) {
                    tracing::warn!(error = %e, "auth check timestamp write failed");
                }
                Some(user)
            }
            Err(ApiError::Network(e)) => {
                tracing::warn!(error = %e, "auth check could not reach backend");
                store.cached_user()
            }
            Err(e) => {
                tracing::info!(error = %e, "auth check failed; clearing session");
                store.clear();
                None
            }
        }
    }

    /// `PUT /auth/profile`, caching the updated profile the backend returns.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send_json`].
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let user: User = self.api.send_json(&ApiRequest::put("auth/profile").json(update)?).await?;
        if let Err(e) = self.store().set_cached_user(&user) {
            tracing::warn!(error = %e, "profile cache write failed");
        }
        Ok(user)
    }

    /// Merge `update` into the cached profile without a backend call.
    pub fn update_cached_user(&self, update: &ProfileUpdate) -> Option<User> {
        let mut user = self.store().cached_user()?;
        update.apply_to(&mut user);
        if let Err(e) = self.store().set_cached_user(&user) {
            tracing::warn!(error = %e, "profile cache write failed");
        }
        Some(user)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
