//! Engine tuning knobs with environment overrides

use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::sync::retry::RetryPolicy;

/// Name of the single remote document
pub const DEFAULT_REMOTE_FILE_NAME: &str = "japanese-learning-app-data.json";

/// Timing and naming parameters for the sync engine
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Quiet period before a burst of triggers turns into one drain
    pub debounce: Duration,
    /// Interval between connectivity and credential checks while suspended
    pub poll_interval: Duration,
    /// First reschedule delay after a failed round, doubled per failure
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    /// Timestamps closer than this are treated as identical
    pub conflict_tolerance: Duration,
    /// Tokens expiring within this window count as invalid
    pub token_safety_margin: Duration,
    /// Per-call retry executor for remote operations
    pub retry: RetryPolicy,
    pub remote_file_name: String,
    pub app_version: String,
    /// Per-request timeout of the HTTP transport
    pub http_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            poll_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            conflict_tolerance: Duration::from_millis(1000),
            token_safety_margin: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            remote_file_name: DEFAULT_REMOTE_FILE_NAME.to_string(),
            app_version: crate::VERSION.to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncSettings {
    /// Defaults overridden by `JPLEARN_SYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        let millis = |key: &str| -> Result<Option<Duration>> {
            lookup(key)
                .map(|raw| parse_u64(key, &raw).map(Duration::from_millis))
                .transpose()
        };
        let secs = |key: &str| -> Result<Option<Duration>> {
            lookup(key)
                .map(|raw| parse_u64(key, &raw).map(Duration::from_secs))
                .transpose()
        };

        if let Some(v) = millis("JPLEARN_SYNC_DEBOUNCE_MS")? {
            settings.debounce = v;
        }
        if let Some(v) = secs("JPLEARN_SYNC_POLL_SECS")? {
            settings.poll_interval = v;
        }
        if let Some(v) = secs("JPLEARN_SYNC_MAX_BACKOFF_SECS")? {
            settings.max_backoff = v;
        }
        if let Some(v) = millis("JPLEARN_SYNC_TOLERANCE_MS")? {
            settings.conflict_tolerance = v;
        }
        if let Some(v) = secs("JPLEARN_SYNC_HTTP_TIMEOUT_SECS")? {
            settings.http_timeout = v;
        }
        if let Some(raw) = lookup("JPLEARN_SYNC_RETRY_ATTEMPTS") {
            let attempts = parse_u64("JPLEARN_SYNC_RETRY_ATTEMPTS", &raw)?;
            let attempts = u32::try_from(attempts).map_err(|_| {
                SyncError::Config(format!("JPLEARN_SYNC_RETRY_ATTEMPTS is too large: {attempts}"))
            })?;
            if attempts == 0 {
                return Err(SyncError::Config(
                    "JPLEARN_SYNC_RETRY_ATTEMPTS must be at least 1".to_string(),
                ));
            }
            settings.retry.max_attempts = attempts;
        }
        if let Some(name) = lookup("JPLEARN_SYNC_FILE_NAME") {
            if name.trim().is_empty() {
                return Err(SyncError::Config(
                    "JPLEARN_SYNC_FILE_NAME must not be empty".to_string(),
                ));
            }
            settings.remote_file_name = name;
        }

        Ok(settings)
    }

    /// Delay before re-draining after `failures` consecutive failed rounds
    pub fn round_backoff(&self, failures: u32) -> Duration {
        crate::sync::retry::exponential_delay(self.backoff_base, failures, self.max_backoff)
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        SyncError::Config(format!("{key} must be a non-negative integer, got {raw:?}"))
    })
}
