//! Retry-with-backoff executor for remote calls

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::remote::{FileId, RemoteBlobStore, RemoteMetadata};
use super::snapshot::AppDataSnapshot;
use crate::error::Result;

/// `base * 2^exponent`, capped at `cap`
pub fn exponential_delay(base: Duration, exponent: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// How many times and how soon a failed remote call is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based): base, 2*base, 4*base...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        exponential_delay(self.base_delay, attempt.saturating_sub(1), self.max_delay)
    }
}

/// Counters distinguishing throttling from generic failures
#[derive(Debug, Default)]
pub struct RetryTelemetry {
    retries: AtomicU64,
    rate_limited: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`RetryTelemetry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryStats {
    /// Retries after transient network or server failures
    pub retries: u64,
    /// Retries after rate-limit responses
    pub rate_limited: u64,
    /// Calls that failed after using the whole retry budget
    pub exhausted: u64,
}

impl RetryTelemetry {
    pub fn stats(&self) -> RetryStats {
        RetryStats {
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Run `f` until it succeeds, fails permanently, or the policy runs out
///
/// Auth failures return immediately without consuming an attempt's backoff.
/// Rate limits follow the same doubling schedule as other transient errors
/// but are counted and logged separately.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    telemetry: &RetryTelemetry,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_auth() => return Err(err),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                if err.is_rate_limit() {
                    telemetry.rate_limited.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "Rate limited by remote, backing off"
                    );
                } else {
                    telemetry.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Transient error, retrying"
                    );
                }
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    telemetry.exhausted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(operation, attempt, error = %err, "Retry budget exhausted");
                }
                return Err(err);
            }
        }
    }
}

/// Decorator applying [`with_retry`] to every operation except `locate`
///
/// `locate` is idempotent and cheap; a failed lookup is retried by the
/// scheduler's round-level backoff instead.
pub struct RetryingStore {
    inner: Arc<dyn RemoteBlobStore>,
    policy: RetryPolicy,
    telemetry: Arc<RetryTelemetry>,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn RemoteBlobStore>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            telemetry: Arc::new(RetryTelemetry::default()),
        }
    }

    pub fn telemetry(&self) -> Arc<RetryTelemetry> {
        self.telemetry.clone()
    }
}

#[async_trait]
impl RemoteBlobStore for RetryingStore {
    async fn locate(&self) -> Result<Option<FileId>> {
        self.inner.locate().await
    }

    async fn create(&self, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        with_retry(&self.policy, &self.telemetry, "create", || {
            self.inner.create(snapshot)
        })
        .await
    }

    async fn read(&self, file_id: &str) -> Result<AppDataSnapshot> {
        with_retry(&self.policy, &self.telemetry, "read", || self.inner.read(file_id)).await
    }

    async fn write(&self, file_id: &str, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        with_retry(&self.policy, &self.telemetry, "write", || {
            self.inner.write(file_id, snapshot)
        })
        .await
    }

    async fn metadata(&self, file_id: &str) -> Result<RemoteMetadata> {
        with_retry(&self.policy, &self.telemetry, "metadata", || {
            self.inner.metadata(file_id)
        })
        .await
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        with_retry(&self.policy, &self.telemetry, "delete", || self.inner.delete(file_id)).await
    }
}
