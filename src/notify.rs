//! User-facing notifications for classified request failures.
//!
//! DESIGN
//! ======
//! Notifications travel on a `tokio::sync::broadcast` channel so emitting
//! never blocks the request path and any number of observers (a status
//! bar, a CLI printer, a test) can subscribe. With no subscribers the
//! event is dropped; the error itself still reaches the caller.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{ApiError, ErrorKind};

const CHANNEL_CAPACITY: usize = 64;

/// A non-blocking message for whoever renders feedback to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The session was torn down; the user must sign in again at `login_path`.
    ReauthRequired { login_path: String },
    Forbidden,
    NotFound,
    RateLimited { retry_after: Duration },
    ServerError { status: u16 },
    NetworkError,
}

impl Notification {
    /// Notification for a failed request, if its class warrants one.
    /// 401s and plain client errors are left to the caller.
    #[must_use]
    pub fn from_error(error: &ApiError) -> Option<Self> {
        match error.kind()? {
            ErrorKind::Forbidden => Some(Self::Forbidden),
            ErrorKind::NotFound => Some(Self::NotFound),
            ErrorKind::RateLimited { retry_after } => Some(Self::RateLimited { retry_after }),
            ErrorKind::ServerError => Some(Self::ServerError { status: error.status().unwrap_or(500) }),
            ErrorKind::NetworkError => Some(Self::NetworkError),
            ErrorKind::AuthExpired | ErrorKind::Client => None,
        }
    }

    /// Human-readable text for display.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ReauthRequired { .. } => "Your session has expired. Please sign in again.".to_owned(),
            Self::Forbidden => "You don't have permission to perform this action.".to_owned(),
            Self::NotFound => "The requested resource was not found.".to_owned(),
            Self::RateLimited { retry_after } => {
                format!("Too many requests. Please wait {} seconds before trying again.", retry_after.as_secs())
            }
            Self::ServerError { status } => format!("Server error ({status}). Please try again later."),
            Self::NetworkError => "Network error. Please check your connection.".to_owned(),
        }
    }
}

/// Sending half of the notification channel. Clone freely.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        tracing::debug!(?notification, "notify");
        // Err only means nobody is listening.
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
