//! Credential provider for sync.
//!
//! The engine depends on exactly three primitives: current-identity lookup,
//! expiry check, and refresh. [`SupabaseCredentials`] implements them over a
//! Supabase-style token endpoint; tests substitute an in-process double.

use std::fmt;
use std::sync::RwLock;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::OwnerId;
use crate::util::{compact_text, is_http_url, unix_millis_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Current-identity, expiry, and refresh primitives used by sync.
pub trait CredentialProvider: Send + Sync {
    /// Identity the credential is issued for.
    fn user_id(&self) -> Result<OwnerId>;

    /// Whether the credential is at or past expiry (with skew).
    fn is_expired(&self) -> bool;

    /// Exchange the refresh token for a fresh credential.
    fn refresh(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// An issued credential pair with its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token used to mint the next session.
    pub refresh_token: String,
    /// Expiry as Unix seconds.
    pub expires_at: i64,
    /// Identity the session belongs to.
    pub user_id: String,
}

impl AuthSession {
    /// Whether the session is at or past expiry, with a safety skew.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_millis_now() / 1000 + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Supabase-backed credential provider.
pub struct SupabaseCredentials {
    auth_url: String,
    anon_key: String,
    client: reqwest::Client,
    session: RwLock<AuthSession>,
}

impl SupabaseCredentials {
    /// Build a provider from a project URL, public key, and restored session.
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        session: AuthSession,
    ) -> Result<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(Error::Auth(
                "Supabase anon key must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Transport(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            auth_url,
            anon_key,
            client,
            session: RwLock::new(session),
        })
    }

    /// Current access token for wiring into API clients.
    pub fn access_token(&self) -> Result<String> {
        self.session
            .read()
            .map(|session| session.access_token.clone())
            .map_err(|_| Error::Auth("credential state poisoned".to_string()))
    }
}

impl CredentialProvider for SupabaseCredentials {
    fn user_id(&self) -> Result<OwnerId> {
        self.session
            .read()
            .map(|session| OwnerId::new(session.user_id.clone()))
            .map_err(|_| Error::Auth("credential state poisoned".to_string()))
    }

    fn is_expired(&self) -> bool {
        self.session
            .read()
            .map_or(true, |session| session.is_expired())
    }

    async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .session
            .read()
            .map(|session| session.refresh_token.clone())
            .map_err(|_| Error::Auth("credential state poisoned".to_string()))?;
        if refresh_token.trim().is_empty() {
            return Err(Error::Auth("Refresh token must not be empty".to_string()));
        }

        let payload = serde_json::json!({ "refresh_token": refresh_token });
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| Error::Transport(format!("Credential refresh failed: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(parse_api_error(status, &body)));
        }

        let refreshed = response
            .json::<TokenResponse>()
            .await
            .map_err(|error| Error::Auth(format!("Invalid refresh payload: {error}")))?
            .into_session()?;

        let mut session = self
            .session
            .write()
            .map_err(|_| Error::Auth("credential state poisoned".to_string()))?;
        *session = refreshed;
        Ok(())
    }
}

fn normalize_auth_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Auth("Supabase URL must not be empty".to_string()));
    }
    if !is_http_url(trimmed) {
        return Err(Error::Auth(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

impl TokenResponse {
    fn into_session(self) -> Result<AuthSession> {
        let access_token = self
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Auth("Refresh response missing access_token".to_string()))?;
        let refresh_token = self
            .refresh_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Auth("Refresh response missing refresh_token".to_string()))?;
        let expires_at = self
            .expires_at
            .or_else(|| {
                self.expires_in
                    .map(|expires_in| unix_millis_now() / 1000 + expires_in)
            })
            .ok_or_else(|| Error::Auth("Refresh response missing expiry".to_string()))?;
        let user_id = self
            .user
            .map(|user| user.id)
            .ok_or_else(|| Error::Auth("Refresh response missing user".to_string()))?;

        Ok(AuthSession {
            access_token,
            refresh_token,
            expires_at,
            user_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<AuthErrorBody>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}
