//! Auth and profile endpoints.
//!
//! Credential exchanges (`/auth/login`, `/auth/register`, `/auth/facebook`)
//! move the session `Anonymous -> Authenticating -> Authenticated` and fall
//! back to `Anonymous` on failure. They run without a bearer token and
//! without 401 recovery: a 401 there means bad credentials, not an expired
//! session.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;
use crate::session::{TokenPair, User};

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Tokens issued by login, registration, Facebook exchange, and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access-token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    full_name: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct FacebookLoginRequest<'a> {
    access_token: &'a str,
}

/// Partial profile update for `PUT /users/profile`; unset fields are left
/// unchanged by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_emails: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_retention_days: Option<u32>,
}

// =============================================================================
// AUTH API
// =============================================================================

pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    #[must_use]
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi { client: self }
    }
}

impl AuthApi<'_> {
    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection (401 for bad credentials, 400 for an
    /// inactive account) or a transport error. The session is left anonymous.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<User>, ApiError> {
        self.exchange("/auth/login", &LoginRequest { email, password }).await
    }

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection (400 when the email is taken) or a
    /// transport error. The session is left anonymous.
    pub async fn register(&self, email: &str, full_name: &str, password: &str) -> Result<Option<User>, ApiError> {
        self.exchange("/auth/register", &RegisterRequest { email, full_name, password }).await
    }

    /// `POST /auth/facebook`: trade a Facebook user access token for a session.
    ///
    /// # Errors
    ///
    /// Returns 400 when the Facebook token is rejected, or a transport error.
    pub async fn facebook_login(&self, facebook_access_token: &str) -> Result<Option<User>, ApiError> {
        self.exchange("/auth/facebook", &FacebookLoginRequest { access_token: facebook_access_token }).await
    }

    /// Rotate the access token via `POST /auth/refresh`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::refresh_session`].
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.client.refresh_session().await
    }

    /// `POST /auth/logout`. The local session is cleared whatever the server
    /// answers; the server's error, if any, is still returned.
    ///
    /// # Errors
    ///
    /// Returns the server-side logout failure.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let session = self.client.session();
        let result = if session.is_authenticated() {
            self.client
                .request::<Value>(Method::POST, "/auth/logout", None, RequestOptions::default().without_refresh())
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        if let Err(error) = &result {
            tracing::warn!(%error, "server-side logout failed; clearing local session anyway");
        }
        session.clear();
        tracing::info!("logged out");
        result
    }

    /// `GET /auth/me`; refreshes the cached user.
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn me(&self) -> Result<User, ApiError> {
        let user: User = self.client.get("/auth/me", RequestOptions::default()).await?;
        self.client.session().set_user(user.clone());
        Ok(user)
    }

    /// `GET /users/profile`; refreshes the cached user.
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn profile(&self) -> Result<User, ApiError> {
        let user: User = self.client.get("/users/profile", RequestOptions::default()).await?;
        self.client.session().set_user(user.clone());
        Ok(user)
    }

    /// `PUT /users/profile`.
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let user: User = self.client.put("/users/profile", update).await?;
        self.client.session().set_user(user.clone());
        Ok(user)
    }

    /// `DELETE /users/account`; ends the session on success.
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn delete_account(&self) -> Result<(), ApiError> {
        let _: Value = self.client.delete("/users/account").await?;
        self.client.session().clear();
        tracing::info!("account deleted");
        Ok(())
    }

    async fn exchange(&self, path: &str, body: &impl Serialize) -> Result<Option<User>, ApiError> {
        let session = self.client.session();
        session.begin_authentication();

        let body = serde_json::to_value(body)?;
        let options = RequestOptions::default().without_auth().without_refresh();
        match self.client.request::<TokenResponse>(Method::POST, path, Some(&body), options).await {
            Ok(response) => {
                let issued = response.data;
                session.establish(
                    TokenPair { access_token: issued.access_token, refresh_token: Some(issued.refresh_token) },
                    issued.user.clone(),
                );
                tracing::info!(path, user = issued.user.as_ref().map(|u| u.email.as_str()), "session established");
                Ok(issued.user)
            }
            Err(error) => {
                session.clear();
                Err(error)
            }
        }
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
