//! Error types for the sync engine

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Message recorded when a round is attempted with an expired or missing token
pub const AUTH_EXPIRED_MESSAGE: &str = "Authentication expired. Please re-authenticate.";

/// Main error type for the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Remote file not found: {0}")]
    NotFound(String),

    #[error("Remote request failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Local storage quota exceeded while writing \"{key}\"")]
    QuotaExceeded { key: String },

    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Sync is not enabled")]
    NotEnabled,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Check if error is worth another attempt inside the retry executor
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Unreachable(_) | SyncError::RateLimited(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }

    /// Auth failures need the consent flow again and are never retried
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// The remote could not be reached at all; the engine reports `offline`
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Unreachable(_))
    }

    /// Short stable label used as a tracing field
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Network(_) => "network",
            SyncError::Unreachable(_) => "unreachable",
            SyncError::RateLimited(_) => "rate_limited",
            SyncError::NotFound(_) => "not_found",
            SyncError::Remote { .. } => "remote",
            SyncError::QuotaExceeded { .. } => "quota_exceeded",
            SyncError::SyncInProgress => "in_progress",
            SyncError::NotEnabled => "not_enabled",
            SyncError::InvalidSnapshot(_) => "invalid_snapshot",
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::Storage(_) => "storage",
            SyncError::Serialization(_) => "serialization",
            SyncError::Io(_) => "io",
            SyncError::Config(_) => "config",
            SyncError::Internal(_) => "internal",
        }
    }
}

#[cfg(feature = "drive")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            SyncError::Unreachable(err.to_string())
        } else if err.is_decode() {
            SyncError::InvalidSnapshot(err.to_string())
        } else if err.is_builder() {
            SyncError::Config(err.to_string())
        } else {
            // timeouts, resets and body errors are transient
            SyncError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::RateLimited("429".into()).is_retryable());
        assert!(SyncError::Unreachable("dns".into()).is_retryable());
        assert!(!SyncError::Auth("expired".into()).is_retryable());
        assert!(!SyncError::Remote {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::QuotaExceeded { key: "k".into() }.is_retryable());
    }

    #[test]
    fn test_offline_only_for_unreachable() {
        assert!(SyncError::Unreachable("refused".into()).is_offline());
        assert!(!SyncError::Network("503".into()).is_offline());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(SyncError::SyncInProgress.kind(), "in_progress");
        assert_eq!(SyncError::RateLimited(String::new()).kind(), "rate_limited");
    }
}
