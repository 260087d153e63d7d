//! Authenticated REST client for the page-analytics backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! The backend exposes auth, user, page, post, analytics, and report
//! endpoints under a versioned prefix and proxies the Facebook Graph API.
//! This crate owns the client side of that contract: bearer-token
//! injection, a single transparent retry after refreshing an expired
//! access token, and classification of failures into user-facing
//! notifications.
//!
//! DESIGN
//! ======
//! A [`SessionHandle`] is created at startup and handed to [`ApiClient::new`];
//! nothing reads tokens from global state. Concurrent requests that observe
//! a 401 converge on one refresh behind an async gate. Every classified
//! failure is returned as an [`ApiError`] and also emitted on the
//! [`Notifier`] channel.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod notify;
pub mod resources;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock_backend;

pub use auth::{AuthApi, ProfileUpdate, TokenResponse};
pub use client::{ApiClient, ApiResponse, RateLimitInfo, RequestOptions};
pub use config::{ClientConfig, Timeouts};
pub use error::{ApiError, ErrorKind};
pub use notify::{Notification, Notifier};
pub use session::{AuthState, Session, SessionHandle, TokenPair, User};
pub use transfer::UploadProgress;
