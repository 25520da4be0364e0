//! Single-flight access-token refresh.
//!
//! ARCHITECTURE
//! ============
//! Every caller that hits an authentication failure goes through
//! [`RefreshCoordinator::request_or_join`]. The first caller (the leader)
//! flips the state to `Refreshing` and performs the network refresh; callers
//! arriving while it is in flight park a oneshot in the pending queue and
//! receive the leader's outcome. Waiters are settled in arrival order.
//!
//! The state returns to `Idle` whenever the leader settles, including when
//! its future is dropped mid-refresh: a drop guard releases the state and
//! fails the parked waiters with [`RefreshError::Abandoned`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::store::SessionStore;
use crate::token::now_millis;

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Why a refresh did not produce a new access token. Shared verbatim by
/// every caller that joined the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("refresh response malformed: {0}")]
    MalformedResponse(String),
    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// Performs the network exchange of a refresh token for a new access token.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<String, RefreshError>;
}

// =============================================================================
// COORDINATOR
// =============================================================================

type Outcome = Result<String, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<oneshot::Sender<Outcome>> },
}

pub struct RefreshCoordinator {
    store: SessionStore,
    state: Mutex<RefreshState>,
    started: AtomicU64,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self { store, state: Mutex::new(RefreshState::Idle), started: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Callers currently parked behind the in-flight refresh.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Network refreshes started over the coordinator's lifetime.
    #[must_use]
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Start a refresh, or wait for the one already in flight.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure shared by every participant. On failure
    /// the session has already been force-logged-out.
    pub async fn request_or_join(&self, refresher: &dyn TokenRefresher) -> Result<String, RefreshError> {
        let joined = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: VecDeque::new() };
                    None
                }
            }
        };

        if let Some(rx) = joined {
            tracing::debug!("joining in-flight token refresh");
            return rx.await.unwrap_or(Err(RefreshError::Abandoned));
        }

        let release = Release { coordinator: self, armed: true };
        let outcome = self.run_refresh(refresher).await;
        release.settle(&outcome);
        outcome
    }

    async fn run_refresh(&self, refresher: &dyn TokenRefresher) -> Outcome {
        self.started.fetch_add(1, Ordering::Relaxed);

        let Some(refresh_token) = self.store.refresh_token() else {
            tracing::warn!("token refresh requested without a refresh token; forcing logout");
            self.store.force_logout();
            return Err(RefreshError::MissingRefreshToken);
        };

        match refresher.refresh(&refresh_token).await {
            Ok(token) => {
                if let Err(e) = self.store.set_access_token(&token) {
                    tracing::warn!(error = %e, "refreshed token could not be persisted");
                }
                if let Err(e) = self.store.touch_auth_check(now_millis()) {
                    tracing::warn!(error = %e, "auth check timestamp could not be persisted");
                }
                tracing::info!("access token refreshed");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed; forcing logout");
                self.store.force_logout();
                Err(e)
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return to `Idle` and hand `outcome` to every parked waiter, FIFO.
    fn release(&self, outcome: &Outcome) {
        let waiters = match std::mem::replace(&mut *self.lock_state(), RefreshState::Idle) {
            RefreshState::Idle => VecDeque::new(),
            RefreshState::Refreshing { waiters } => waiters,
        };
        if !waiters.is_empty() {
            tracing::debug!(count = waiters.len(), ok = outcome.is_ok(), "settling queued refresh waiters");
        }
        for waiter in waiters {
            // A waiter whose caller went away has nothing to receive.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending())
            .field("started", &self.refreshes_started())
            .finish_non_exhaustive()
    }
}

/// Releases the coordinator even if the leader's future is dropped.
struct Release<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Release<'_> {
    fn settle(mut self, outcome: &Outcome) {
        self.armed = false;
        self.coordinator.release(outcome);
    }
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("token refresh dropped before settling");
            self.coordinator.release(&Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
