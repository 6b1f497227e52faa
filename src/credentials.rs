//! # Credential Provider
//!
//! Supplies inventory API tokens. A provider is built once at startup and
//! handed to the clients that need it; the cached provider refreshes its
//! token when it is about to expire.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Token endpoint rejected credentials: HTTP {status}")]
    Rejected { status: u16 },

    #[error("Token response was not understood: {0}")]
    InvalidResponse(String),

    #[error("Credential configuration error: {0}")]
    Configuration(String),
}

/// Source of a valid API token
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a token that is valid for at least the provider's refresh margin
    async fn get_valid_token(&self) -> Result<String, CredentialError>;
}

/// Always hands out the same token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn get_valid_token(&self) -> Result<String, CredentialError> {
        Ok(self.token.clone())
    }
}

/// A token as issued by a [`TokenSource`]
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry reported by the issuer, if any
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues fresh tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Logs in against the token endpoint with username and password
pub struct HttpTokenSource {
    client: Client,
    token_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for HttpTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenSource")
            .field("token_url", &self.token_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl HttpTokenSource {
    pub fn new(config: &AuthConfig, timeout: Duration) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("lifecycle-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CredentialError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialError> {
        debug!(token_url = %self.token_url, "Requesting inventory token");

        let response = self
            .client
            .post(&self.token_url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        Ok(IssuedToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caches a token from a [`TokenSource`] and refreshes it before expiry.
///
/// The token is considered expired `refresh_margin` before its real expiry.
/// When the issuer reports no expiry, `ttl` from fetch time is assumed.
/// Refresh is serialized, so concurrent callers trigger a single fetch.
pub struct CachedTokenProvider<S> {
    source: S,
    ttl: ChronoDuration,
    refresh_margin: ChronoDuration,
    cached: Mutex<Option<CachedToken>>,
}

impl<S: TokenSource> CachedTokenProvider<S> {
    pub fn new(source: S, ttl: Duration, refresh_margin: Duration) -> Self {
        Self {
            source,
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
            refresh_margin: ChronoDuration::from_std(refresh_margin)
                .unwrap_or(ChronoDuration::zero()),
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(source: S, config: &AuthConfig) -> Self {
        Self::new(
            source,
            Duration::from_secs(config.token_ttl_seconds),
            Duration::from_secs(config.refresh_margin_seconds),
        )
    }

    /// Drop the cached token so the next call fetches a new one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

impl<S> std::fmt::Debug for CachedTokenProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokenProvider")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .field("refresh_margin_seconds", &self.refresh_margin.num_seconds())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: TokenSource> CredentialProvider for CachedTokenProvider<S> {
    async fn get_valid_token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if now + self.refresh_margin < token.expires_at {
                return Ok(token.token.clone());
            }
            debug!(expires_at = %token.expires_at, "Inventory token due for refresh");
        }

        let issued = match self.source.fetch_token().await {
            Ok(issued) => issued,
            Err(e) => {
                warn!(error = %e, "Failed to refresh inventory token");
                return Err(e);
            }
        };
        let expires_at = issued.expires_at.unwrap_or(now + self.ttl);
        info!(expires_at = %expires_at, "Refreshed inventory token");

        *cached = Some(CachedToken {
            token: issued.token.clone(),
            expires_at,
        });
        Ok(issued.token)
    }
}
