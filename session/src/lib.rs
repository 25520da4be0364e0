//! Session handling for the Penzi web client.
//!
//! ARCHITECTURE
//! ============
//! The crate is layered bottom-up:
//!
//! - [`token`] decodes JWT payloads without verifying signatures. Expiry is
//!   advisory here; the backend stays the authority.
//! - [`store`] persists the token pair, the cached profile and the last
//!   auth-check timestamp behind a pluggable key-value medium.
//! - [`refresh`] serializes token refreshes so concurrent `401`s share a
//!   single network call.
//! - [`api`] attaches credentials to backend calls and replays them once
//!   after a refresh.
//! - [`auth`] composes the above into login, logout and current-user checks.
//!
//! The `server` crate reuses [`token`] for its route guard.

pub mod api;
pub mod auth;
pub mod refresh;
pub mod store;
pub mod token;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{ApiClient, ApiConfig, ApiError, ApiRequest};
pub use auth::AuthSession;
pub use refresh::{RefreshCoordinator, RefreshError, TokenRefresher};
pub use store::{Session, SessionStore};
pub use token::{Decoded, TokenClaims};
