use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::{CredentialPair, TokenStore, ACCESS_TOKEN_KEY};
use crate::models::User;

/// Derived session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No access token stored.
    Anonymous,
    /// Access token stored and not currently rejected.
    Authenticated,
    /// Access token rejected, refresh in flight.
    Expired,
}

/// In-memory view of the session: `{ user, token, isAuthenticated }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub user: Option<User>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEndReason {
    /// The refresh endpoint rejected the refresh token or failed.
    RefreshFailed,
    /// A 401 arrived and there was no refresh token to try.
    NoRefreshToken,
    /// The request retried with a freshly refreshed token was rejected again.
    RetryRejected,
    /// Explicit logout.
    UserLogout,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEndReason::RefreshFailed => write!(f, "session expired and could not be renewed"),
            SessionEndReason::NoRefreshToken => write!(f, "session expired"),
            SessionEndReason::RetryRejected => write!(f, "credentials were rejected"),
            SessionEndReason::UserLogout => write!(f, "logged out"),
        }
    }
}

/// Session-ended notification handed to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub reason: SessionEndReason,
    pub at: DateTime<Utc>,
}

pub type SessionEndedListener = Arc<dyn Fn(&SessionEnded) + Send + Sync>;

/// Session shared between the gateway and the rest of the application.
///
/// Owns the credential store and the "session ended" listener. Every
/// teardown advances an epoch; requests remember the epoch they were sent
/// under so that several requests failing on the same dead session produce a
/// single notification.
pub struct SessionContext {
    store: Arc<dyn TokenStore>,
    on_session_ended: Option<SessionEndedListener>,
    state: RwLock<AuthState>,
    refreshing: AtomicBool,
    epoch: AtomicU64,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("has_listener", &self.on_session_ended.is_some())
            .finish()
    }
}

impl SessionContext {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        // An unreadable store starts the session anonymous.
        let token = store.access_token().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored access token");
            None
        });
        let state = AuthState {
            user: None,
            is_authenticated: token.is_some(),
            token,
        };
        Self {
            store,
            on_session_ended: None,
            state: RwLock::new(state),
            refreshing: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    /// Install the listener invoked when the session ends.
    pub fn with_session_ended<F>(mut self, listener: F) -> Self
    where
        F: Fn(&SessionEnded) + Send + Sync + 'static,
    {
        self.on_session_ended = Some(Arc::new(listener));
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.store.access_token()
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.store.refresh_token()
    }

    pub fn state(&self) -> SessionState {
        if self.refreshing.load(Ordering::SeqCst) {
            return SessionState::Expired;
        }
        if self.read_state().is_authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.read_state().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read_state().user.clone()
    }

    pub fn set_user(&self, user: User) {
        self.write_state().user = Some(user);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a session from freshly issued credentials.
    pub fn establish(&self, pair: &CredentialPair, user: Option<User>) -> Result<()> {
        self.store.save_credentials(pair)?;
        let mut state = self.write_state();
        state.token = Some(pair.access_token.clone());
        state.is_authenticated = true;
        state.user = user;
        info!("Session established");
        Ok(())
    }

    /// Replace the access token after a successful refresh.
    pub fn replace_access_token(&self, token: &str) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, token)?;
        let mut state = self.write_state();
        state.token = Some(token.to_string());
        state.is_authenticated = true;
        Ok(())
    }

    /// Clear credentials and notify the listener, unconditionally.
    pub fn teardown(&self, reason: SessionEndReason) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.clear_and_notify(reason);
    }

    /// Tear down only if no teardown happened since `epoch` was observed.
    ///
    /// Returns whether this call performed the teardown.
    pub fn teardown_if_current(&self, epoch: u64, reason: SessionEndReason) -> bool {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.clear_and_notify(reason);
        true
    }

    pub(crate) fn begin_refresh(&self) -> RefreshGuard<'_> {
        self.refreshing.store(true, Ordering::SeqCst);
        RefreshGuard { session: self }
    }

    fn clear_and_notify(&self, reason: SessionEndReason) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        *self.write_state() = AuthState::default();
        info!(reason = ?reason, "Session ended");

        if let Some(ref listener) = self.on_session_ended {
            listener(&SessionEnded {
                reason,
                at: Utc::now(),
            });
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, AuthState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, AuthState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks the session `Expired` while a refresh is in flight.
pub(crate) struct RefreshGuard<'a> {
    session: &'a SessionContext,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.session.refreshing.store(false, Ordering::SeqCst);
    }
}
