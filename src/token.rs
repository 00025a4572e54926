//! Credential lifecycle management for Hestia
//!
//! Owns the provider credential and refreshes it transparently before use.
//! Validity is recomputed on every call, so repeated checks on a non-expired
//! token are a pure no-op.

use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Safety buffer before expiry at which a refresh is attempted
const REFRESH_BUFFER_SECONDS: i64 = 60;

/// OAuth credential for the provider API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token sent with every call
    pub access_token: String,

    /// Refresh token, absent when the caller manages its own renewal
    pub refresh_token: Option<String>,

    /// Wall-clock time after which the token must be treated as unusable
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the token is inside the refresh buffer at `now`
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at - Duration::seconds(REFRESH_BUFFER_SECONDS)
    }
}

/// Refresh-exchange seam so the manager can be tested without a network
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;
}

/// Refresh exchange against the provider's OAuth token endpoint
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    auth_url: String,
}

impl HttpTokenRefresher {
    pub fn new(auth_url: String, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, auth_url })
    }
}

#[async_trait::async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let resp = self
            .client
            .post(&self.auth_url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .send()
            .await
            .map_err(|e| HestiaError::auth(format!("Refresh exchange failed: {}", e)))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| HestiaError::auth(format!("Malformed refresh response: {}", e)))?;

        if !status.is_success() {
            let msg = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("refresh exchange rejected");
            return Err(HestiaError::auth(format!(
                "Refresh exchange failed ({}): {}",
                status.as_u16(),
                msg
            )));
        }

        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HestiaError::auth("Refresh response missing access_token"))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(3600);
        let new_refresh = body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            // Providers that rotate refresh tokens send a new one; others
            // expect the old token to be reused.
            .or_else(|| Some(refresh_token.to_string()));

        Ok(Credential {
            access_token,
            refresh_token: new_refresh,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        })
    }
}

/// Owns one credential and refreshes it transparently before use
pub struct TokenLifecycleManager {
    refresher: Arc<dyn TokenRefresher>,
    current: Mutex<Option<Credential>>,
    logger: crate::logging::StructuredLogger,
}

impl TokenLifecycleManager {
    /// Create a new manager around a refresh seam
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        let logger = get_logger("token");
        Self {
            refresher,
            current: Mutex::new(None),
            logger,
        }
    }

    /// Replace the managed credential
    pub async fn set_credential(&self, credential: Credential) {
        let mut guard = self.current.lock().await;
        *guard = Some(credential);
    }

    /// Snapshot of the managed credential, if any
    pub async fn credential(&self) -> Option<Credential> {
        self.current.lock().await.clone()
    }

    /// Return a credential that is valid for immediate use.
    ///
    /// If the input is inside the 60-second refresh buffer and carries a
    /// refresh token, a refresh exchange is performed and the new credential
    /// returned. A credential without a refresh token is returned unchanged
    /// even when expired; the failure then surfaces as an authorization
    /// error from the remote call. On refresh failure the input is left
    /// untouched so callers keep their last-known-good credential.
    pub async fn ensure_valid(&self, credential: &Credential) -> Result<Credential> {
        if !credential.needs_refresh(Utc::now()) {
            return Ok(credential.clone());
        }

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            self.logger
                .debug("Credential expired but has no refresh token; caller manages renewal");
            return Ok(credential.clone());
        };

        self.logger.info("Refreshing credential before use");
        let refreshed = self.refresher.refresh(refresh_token).await?;
        Ok(refreshed)
    }

    /// Bearer token for the next outbound call.
    ///
    /// Serializes concurrent callers through one mutex: the first caller to
    /// observe an expiring token performs the refresh, later callers see the
    /// stored fresh credential and take the no-op path.
    pub async fn bearer(&self) -> Result<String> {
        let mut guard = self.current.lock().await;
        let current = guard
            .as_ref()
            .ok_or_else(|| HestiaError::auth("No credential configured"))?;

        let valid = self.ensure_valid(current).await?;
        let token = valid.access_token.clone();
        *guard = Some(valid);
        Ok(token)
    }
}
