//! Client-side session persistence.
//!
//! ARCHITECTURE
//! ============
//! A session spans two storage areas, mirroring the browser split the web
//! client was built around: a cookie-like area holding the `token` and
//! `refreshToken` values (with expiry and transport attributes), and a plain
//! key-value area holding the cached `user` profile plus the `lastAuthCheck`
//! timestamp. Both areas sit behind [`KeyValueStore`] so the same
//! [`SessionStore`] works in-process ([`MemoryStore`]) or persisted to disk
//! ([`FileStore`]).
//!
//! TRADE-OFFS
//! ==========
//! Writes are best-effort and not transactional. `clear()` removes keys one
//! at a time; a concurrent reader can observe a half-cleared session, which
//! `get()` then reports as absent (partial sessions are invalid).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::token::now_secs;
use crate::types::User;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";
pub const LAST_AUTH_CHECK_KEY: &str = "lastAuthCheck";

/// Where forced logouts send the user.
pub const LOGIN_PATH: &str = "/login";

const SECS_PER_DAY: i64 = 86_400;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// STORAGE MEDIUM
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes applied to token cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieAttributes {
    pub expires_days: u32,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self { expires_days: 7, secure: true, same_site: SameSite::Strict }
    }
}

/// A stored value plus its optional cookie metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<CookieAttributes>,
    /// Absolute expiry in epoch seconds, derived from `attributes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Entry {
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self { value: value.into(), attributes: None, expires_at: None }
    }

    #[must_use]
    pub fn cookie(value: impl Into<String>, attributes: CookieAttributes, now: i64) -> Self {
        let expires_at = now.saturating_add(i64::from(attributes.expires_days) * SECS_PER_DAY);
        Self { value: value.into(), attributes: Some(attributes), expires_at: Some(expires_at) }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Storage medium for one session area.
pub trait KeyValueStore: Send + Sync {
    /// Return the live entry for `key`; expired entries read as absent.
    fn get(&self, key: &str) -> Option<Entry>;
    fn set(&self, key: &str, entry: Entry) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Entry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).filter(|e| e.is_live(now_secs())).cloned()
    }

    fn set(&self, key: &str, entry: Entry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// JSON-file store. The whole map is rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl FileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, Entry>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<Entry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).filter(|e| e.is_live(now_secs())).cloned()
    }

    fn set(&self, key: &str, entry: Entry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), entry);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

// =============================================================================
// NAVIGATION HOOK
// =============================================================================

/// Host-provided navigation, used by [`SessionStore::force_logout`].
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator for hosts without navigation (CLI tools, background jobs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate(&self, path: &str) {
        tracing::debug!(%path, "navigation requested without a navigator");
    }
}

/// Navigator that records every requested path. Intended for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_owned());
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// A complete stored session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub cached_user: Option<User>,
}

/// Typed access to the two session areas.
#[derive(Clone)]
pub struct SessionStore {
    cookies: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    cookie_attributes: CookieAttributes,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("cookie_attributes", &self.cookie_attributes)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(cookies: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { cookies, local, navigator, cookie_attributes: CookieAttributes::default() }
    }

    /// Both areas in memory, no navigation.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()), Arc::new(NoopNavigator))
    }

    #[must_use]
    pub fn with_cookie_attributes(mut self, attributes: CookieAttributes) -> Self {
        self.cookie_attributes = attributes;
        self
    }

    #[must_use]
    pub fn cookie_attributes(&self) -> CookieAttributes {
        self.cookie_attributes
    }

    /// Return the stored session. A session with only one token is cleared
    /// and reported as absent.
    #[must_use]
    pub fn get(&self) -> Option<Session> {
        match (self.access_token(), self.refresh_token()) {
            (Some(access_token), Some(refresh_token)) => {
                Some(Session { access_token, refresh_token, cached_user: self.cached_user() })
            }
            (None, None) => None,
            _ => {
                tracing::warn!("partial session found in storage; clearing");
                self.clear();
                None
            }
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.cookies.get(TOKEN_KEY).map(|e| e.value).filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.cookies.get(REFRESH_TOKEN_KEY).map(|e| e.value).filter(|v| !v.is_empty())
    }

    /// Store both tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie area cannot be written.
    pub fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        let now = now_secs();
        self.cookies.set(TOKEN_KEY, Entry::cookie(access, self.cookie_attributes, now))?;
        self.cookies.set(REFRESH_TOKEN_KEY, Entry::cookie(refresh, self.cookie_attributes, now))
    }

    /// Replace the access token, keeping the refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie area cannot be written.
    pub fn set_access_token(&self, access: &str) -> Result<(), StoreError> {
        self.cookies.set(TOKEN_KEY, Entry::cookie(access, self.cookie_attributes, now_secs()))
    }

    /// Cached profile; unreadable JSON is treated as absent.
    #[must_use]
    pub fn cached_user(&self) -> Option<User> {
        let raw = self.local.get(USER_KEY)?.value;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cached user");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the profile area cannot be written.
    pub fn set_cached_user(&self, user: &User) -> Result<(), StoreError> {
        self.local.set(USER_KEY, Entry::plain(serde_json::to_string(user)?))
    }

    /// Epoch millis of the last confirmed auth check.
    #[must_use]
    pub fn last_auth_check(&self) -> Option<i64> {
        self.local.get(LAST_AUTH_CHECK_KEY)?.value.parse().ok()
    }

    /// # Errors
    ///
    /// Returns an error if the profile area cannot be written.
    pub fn touch_auth_check(&self, now_millis: i64) -> Result<(), StoreError> {
        self.local.set(LAST_AUTH_CHECK_KEY, Entry::plain(now_millis.to_string()))
    }

    /// Remove tokens, cached profile and the auth-check timestamp.
    /// Failures are logged; remaining keys are still attempted.
    pub fn clear(&self) {
        for (area, key) in [
            (&self.cookies, TOKEN_KEY),
            (&self.cookies, REFRESH_TOKEN_KEY),
            (&self.local, USER_KEY),
            (&self.local, LAST_AUTH_CHECK_KEY),
        ] {
            if let Err(e) = area.remove(key) {
                tracing::warn!(%key, error = %e, "failed to remove session key");
            }
        }
        tracing::debug!("session cleared");
    }

    /// Clear the session and send the host to the login page.
    pub fn force_logout(&self) {
        self.clear();
        tracing::info!(path = LOGIN_PATH, "forced logout");
        self.navigator.navigate(LOGIN_PATH);
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
