//! Session ownership and the authentication state machine.
//!
//! ARCHITECTURE
//! ============
//! `Anonymous -> Authenticating -> Authenticated -> Refreshing -> Authenticated | Anonymous`
//!
//! Tokens only exist inside the `Authenticated` and `Refreshing` states, so
//! "access token present while not authenticated" cannot be represented.
//! A [`SessionHandle`] is created at startup, passed to the client, and
//! cleared on logout or on an irrecoverable refresh failure.
//!
//! TRADE-OFFS
//! ==========
//! State sits behind a `std::sync::RwLock`: every critical section is a
//! short read or swap and never spans an `.await`. Transitions are also
//! published on a `watch` channel for observers that react to sign-out.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ApiError;

// =============================================================================
// USER
// =============================================================================

/// Account as returned by the backend (`UserResponse`). Timestamps are kept
/// as the server's ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub email_notifications: bool,
    #[serde(default)]
    pub marketing_emails: bool,
    #[serde(default)]
    pub last_login_at: Option<String>,
    #[serde(default)]
    pub pages_connected: u32,
    #[serde(default)]
    pub reports_generated: u32,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub is_facebook_connected: bool,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Observable phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone)]
enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated { tokens: TokenPair, user: Option<User> },
    Refreshing { tokens: TokenPair, user: Option<User> },
}

impl SessionState {
    fn auth_state(&self) -> AuthState {
        match self {
            Self::Anonymous => AuthState::Anonymous,
            Self::Authenticating => AuthState::Authenticating,
            Self::Authenticated { .. } => AuthState::Authenticated,
            Self::Refreshing { .. } => AuthState::Refreshing,
        }
    }

    fn tokens(&self) -> Option<&TokenPair> {
        match self {
            Self::Authenticated { tokens, .. } | Self::Refreshing { tokens, .. } => Some(tokens),
            Self::Anonymous | Self::Authenticating => None,
        }
    }

    fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated { user, .. } | Self::Refreshing { user, .. } => user.as_ref(),
            Self::Anonymous | Self::Authenticating => None,
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub is_authenticated: bool,
}

/// On-disk form shared between CLI invocations.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Shared, owned session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
    state_tx: Arc<watch::Sender<AuthState>>,
}

impl SessionHandle {
    /// A fresh anonymous session.
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(AuthState::Anonymous);
        Self { inner: Arc::new(RwLock::new(SessionState::Anonymous)), state_tx: Arc::new(state_tx) }
    }

    /// A session already holding tokens, e.g. restored from storage.
    #[must_use]
    pub fn with_tokens(tokens: TokenPair, user: Option<User>) -> Self {
        let session = Self::new();
        session.establish(tokens, user);
        session
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.read(SessionState::auth_state)
    }

    /// Watch auth-state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), AuthState::Authenticated | AuthState::Refreshing)
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read(|s| s.tokens().map(|t| t.access_token.clone()))
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read(|s| s.tokens().and_then(|t| t.refresh_token.clone()))
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.read(|s| s.user().cloned())
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.read(|s| Session {
            access_token: s.tokens().map(|t| t.access_token.clone()),
            refresh_token: s.tokens().and_then(|t| t.refresh_token.clone()),
            user: s.user().cloned(),
            is_authenticated: s.tokens().is_some(),
        })
    }

    /// Enter `Authenticating` while credentials are exchanged. Any previous
    /// tokens are dropped.
    pub fn begin_authentication(&self) {
        self.transition(|_| SessionState::Authenticating);
    }

    /// Enter `Authenticated` with freshly issued tokens.
    pub fn establish(&self, tokens: TokenPair, user: Option<User>) {
        self.transition(|_| SessionState::Authenticated { tokens, user });
    }

    /// Move `Authenticated -> Refreshing` and hand back the refresh token.
    ///
    /// Returns `None`, leaving the state untouched, when there is no session
    /// or it carries no refresh token.
    pub fn begin_refresh(&self) -> Option<String> {
        let mut refresh_token = None;
        self.transition(|state| match state {
            SessionState::Authenticated { tokens, user } | SessionState::Refreshing { tokens, user } => {
                match tokens.refresh_token.clone() {
                    Some(token) => {
                        refresh_token = Some(token);
                        SessionState::Refreshing { tokens, user }
                    }
                    None => SessionState::Authenticated { tokens, user },
                }
            }
            other => other,
        });
        refresh_token
    }

    /// Finish a refresh with rotated tokens. A `None` refresh token keeps the
    /// previous one; a `None` user keeps the cached user.
    ///
    /// Applies only from `Refreshing`. If the session was cleared or
    /// replaced while the refresh was in flight, the tokens are discarded
    /// and `false` is returned.
    pub fn complete_refresh(&self, tokens: TokenPair, user: Option<User>) -> bool {
        let mut applied = false;
        self.transition(|state| match state {
            SessionState::Refreshing { tokens: prev, user: cached } => {
                applied = true;
                SessionState::Authenticated {
                    tokens: TokenPair {
                        access_token: tokens.access_token,
                        refresh_token: tokens.refresh_token.or(prev.refresh_token),
                    },
                    user: user.or(cached),
                }
            }
            other => other,
        });
        applied
    }

    /// Replace the cached user without touching tokens.
    pub fn set_user(&self, user: User) {
        self.transition(|state| match state {
            SessionState::Authenticated { tokens, .. } => SessionState::Authenticated { tokens, user: Some(user) },
            SessionState::Refreshing { tokens, .. } => SessionState::Refreshing { tokens, user: Some(user) },
            other => other,
        });
    }

    /// Drop every session field. Returns whether anything was held.
    pub fn clear(&self) -> bool {
        let mut was_active = false;
        self.transition(|state| {
            was_active = !matches!(state, SessionState::Anonymous);
            SessionState::Anonymous
        });
        was_active
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Write the session to `path`, or remove the file when anonymous.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or removed.
    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        let persisted = self.read(|s| {
            s.tokens().map(|t| PersistedSession {
                access_token: t.access_token.clone(),
                refresh_token: t.refresh_token.clone(),
                user: s.user().cloned(),
            })
        });
        let Some(persisted) = persisted else {
            return match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&persisted)?)?;
        tracing::debug!(path = %path.display(), "session saved");
        Ok(())
    }

    /// Restore a session written by [`SessionHandle::save`]. A missing file
    /// yields an anonymous session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedSession = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %path.display(), "session restored");
        Ok(Self::with_tokens(
            TokenPair { access_token: persisted.access_token, refresh_token: persisted.refresh_token },
            persisted.user,
        ))
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn transition(&self, f: impl FnOnce(SessionState) -> SessionState) {
        let next_state = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let current = std::mem::replace(&mut *guard, SessionState::Anonymous);
            *guard = f(current);
            guard.auth_state()
        };
        self.state_tx.send_if_modified(|state| {
            let changed = *state != next_state;
            *state = next_state;
            changed
        });
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
