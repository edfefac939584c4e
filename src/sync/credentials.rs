//! OAuth access-token handling
//!
//! Tokens are obtained only through an explicit consent flow and are never
//! refreshed in the background: once a token is inside the safety margin of
//! its expiry, every remote call fails with an auth error until the host runs
//! the consent flow again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Result, SyncError, AUTH_EXPIRED_MESSAGE};

const MAX_GRANT_SECONDS: u64 = 365 * 24 * 60 * 60;

/// An access token with its absolute expiry
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Valid if expiry is more than `margin` away from `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(margin) {
            Some(deadline) => self.expires_at > deadline,
            None => false,
        }
    }
}

/// What the consent flow hands back
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in_seconds: u64,
}

/// The host's interactive OAuth consent flow
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn request_token(&self) -> Result<TokenGrant>;
}

/// Remote token revocation endpoint
#[async_trait]
pub trait TokenRevoker: Send + Sync {
    async fn revoke(&self, access_token: &str) -> Result<()>;
}

/// Token state consumed by the engine and the remote store
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A token exists and is outside the expiry safety margin
    fn has_valid_token(&self) -> bool;

    /// The current token, or an auth error if it is missing or expiring
    fn access_token(&self) -> Result<String>;

    fn current(&self) -> Option<Credential>;

    /// Re-seed from persisted state without running the consent flow
    fn restore(&self, credential: Option<Credential>);

    /// Run the consent flow once
    async fn acquire(&self) -> Result<Credential>;

    /// Revoke remotely where supported, then forget the token
    async fn revoke(&self) -> Result<()>;
}

/// [`CredentialProvider`] backed by a consent flow and an optional revoker
pub struct TokenCredentials {
    token: RwLock<Option<Credential>>,
    flow: Arc<dyn ConsentFlow>,
    revoker: Option<Arc<dyn TokenRevoker>>,
    safety_margin: Duration,
}

impl TokenCredentials {
    pub fn new(flow: Arc<dyn ConsentFlow>, safety_margin: Duration) -> Self {
        Self {
            token: RwLock::new(None),
            flow,
            revoker: None,
            safety_margin,
        }
    }

    pub fn with_revoker(mut self, revoker: Arc<dyn TokenRevoker>) -> Self {
        self.revoker = Some(revoker);
        self
    }
}

#[async_trait]
impl CredentialProvider for TokenCredentials {
    fn has_valid_token(&self) -> bool {
        self.token
            .read()
            .as_ref()
            .is_some_and(|c| c.is_valid_at(Utc::now(), self.safety_margin))
    }

    fn access_token(&self) -> Result<String> {
        match self.token.read().as_ref() {
            Some(c) if c.is_valid_at(Utc::now(), self.safety_margin) => Ok(c.access_token.clone()),
            _ => Err(SyncError::Auth(AUTH_EXPIRED_MESSAGE.to_string())),
        }
    }

    fn current(&self) -> Option<Credential> {
        self.token.read().clone()
    }

    fn restore(&self, credential: Option<Credential>) {
        *self.token.write() = credential;
    }

    async fn acquire(&self) -> Result<Credential> {
        let grant = self.flow.request_token().await?;
        if grant.access_token.is_empty() {
            return Err(SyncError::Auth("consent flow returned an empty token".to_string()));
        }
        // Google grants last an hour; clamp absurd values instead of overflowing
        let lifetime =
            chrono::Duration::seconds(grant.expires_in_seconds.min(MAX_GRANT_SECONDS) as i64);
        let credential = Credential {
            access_token: grant.access_token,
            expires_at: Utc::now() + lifetime,
        };
        tracing::info!(expires_at = %credential.expires_at, "Access token acquired");
        *self.token.write() = Some(credential.clone());
        Ok(credential)
    }

    async fn revoke(&self) -> Result<()> {
        let token = self.token.write().take();
        if let (Some(token), Some(revoker)) = (token, &self.revoker) {
            // the local token is already gone, so a failed revocation is only logged
            if let Err(e) = revoker.revoke(&token.access_token).await {
                tracing::warn!(error = %e, "Remote token revocation failed");
            }
        }
        Ok(())
    }
}

/// Consent flow that hands out a token obtained out of band
pub struct StaticTokenFlow {
    grant: TokenGrant,
}

impl StaticTokenFlow {
    pub fn new(access_token: impl Into<String>, expires_in_seconds: u64) -> Self {
        Self {
            grant: TokenGrant {
                access_token: access_token.into(),
                expires_in_seconds,
            },
        }
    }
}

#[async_trait]
impl ConsentFlow for StaticTokenFlow {
    async fn request_token(&self) -> Result<TokenGrant> {
        Ok(self.grant.clone())
    }
}

/// Consent flow for hosts with no interactive login
pub struct NoConsentFlow;

#[async_trait]
impl ConsentFlow for NoConsentFlow {
    async fn request_token(&self) -> Result<TokenGrant> {
        Err(SyncError::Auth(
            "no consent flow configured; supply an access token".to_string(),
        ))
    }
}
