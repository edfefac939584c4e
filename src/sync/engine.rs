//! Sync engine: one state machine over the queue, scheduler, remote store,
//! credentials and conflict resolver
//!
//! Rounds are serialized by an in-flight flag. Every remote error ends up
//! here and is mapped onto the displayed [`SyncState`]:
//! - unreachable remote: `offline`, connectivity polling
//! - expired or missing credential: `error`, validity polling
//! - anything else: `error`, rescheduled with doubling backoff

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::conflict::{ConflictChoice, ConflictDecider, ConflictInfo, ConflictResolver, Plan};
use super::credentials::{Credential, CredentialProvider};
use super::network::NetworkStatus;
use super::queue::SyncQueue;
use super::remote::{FileId, RemoteBlobStore, RemoteMetadata};
use super::retry::{RetryStats, RetryTelemetry, RetryingStore};
use super::snapshot::AppDataSnapshot;
use super::worker::{QueueDrainer, Scheduler, SchedulerTimings};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError, AUTH_EXPIRED_MESSAGE};
use crate::storage::AppStore;
use crate::types::{
    ResolutionKind, SyncConfig, SyncDirection, SyncReason, SyncReport, SyncState,
    SyncStatusReport,
};

/// Narrow capability handed to whoever mutates synced data
pub trait SyncTrigger: Send + Sync {
    /// Record a change and schedule a debounced sync
    fn trigger(&self, reason: SyncReason);
}

/// Why a drain did not run a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
    Offline,
    CredentialInvalid,
    NothingQueued,
}

impl SkipReason {
    fn into_error(self) -> SyncError {
        match self {
            SkipReason::Disabled => SyncError::NotEnabled,
            SkipReason::InFlight => SyncError::SyncInProgress,
            SkipReason::Offline => SyncError::Unreachable("network is offline".to_string()),
            SkipReason::CredentialInvalid => SyncError::Auth(AUTH_EXPIRED_MESSAGE.to_string()),
            SkipReason::NothingQueued => {
                SyncError::Internal("queue was drained by another round".to_string())
            }
        }
    }
}

/// Result of one drain attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Synced(SyncReport),
}

/// Set while a round runs; cleared on drop
struct RoundGuard<'a>(&'a AtomicBool);

impl<'a> RoundGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Where the remote document stands at the start of a round
enum RemoteFile {
    Existing(RemoteMetadata),
    /// Freshly created from local data
    Created(RemoteMetadata),
}

/// What a finished round hands to the queue bookkeeping
struct Round {
    report: SyncReport,
    /// Remote modification time after an upload
    uploaded_at: Option<DateTime<Utc>>,
}

impl Round {
    fn new(direction: SyncDirection, resolution: ResolutionKind) -> Self {
        Self {
            report: SyncReport::new(direction, resolution),
            uploaded_at: None,
        }
    }

    fn uploaded(resolution: ResolutionKind, meta: &RemoteMetadata) -> Self {
        Self {
            report: SyncReport::new(SyncDirection::Upload, resolution),
            uploaded_at: Some(meta.modified_at),
        }
    }
}

struct EngineInner {
    store: Arc<AppStore>,
    queue: SyncQueue,
    /// Retry-wrapped store used by rounds
    remote: Arc<dyn RemoteBlobStore>,
    /// Undecorated store, for single-shot connectivity checks
    direct_remote: Arc<dyn RemoteBlobStore>,
    telemetry: Arc<RetryTelemetry>,
    credentials: Arc<dyn CredentialProvider>,
    network: Arc<dyn NetworkStatus>,
    resolver: ConflictResolver,
    settings: SyncSettings,
    in_flight: AtomicBool,
    state: Mutex<SyncState>,
    scheduler: Scheduler,
}

/// The sync engine
///
/// Dropping the engine stops its scheduler task.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build an engine and spawn its scheduler
    ///
    /// # Panics
    ///
    /// When called outside a tokio runtime.
    pub fn new(
        store: Arc<AppStore>,
        remote: Arc<dyn RemoteBlobStore>,
        credentials: Arc<dyn CredentialProvider>,
        network: Arc<dyn NetworkStatus>,
        settings: SyncSettings,
    ) -> Self {
        let retrying = RetryingStore::new(remote.clone(), settings.retry.clone());
        let telemetry = retrying.telemetry();
        let timings = SchedulerTimings {
            debounce: settings.debounce,
            poll_interval: settings.poll_interval,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let drainer: Weak<dyn QueueDrainer> = weak.clone();
            EngineInner {
                queue: SyncQueue::new(store.clone()),
                store,
                remote: Arc::new(retrying),
                direct_remote: remote,
                telemetry,
                credentials,
                network,
                resolver: ConflictResolver::new(settings.conflict_tolerance),
                settings,
                in_flight: AtomicBool::new(false),
                state: Mutex::new(SyncState::Idle),
                scheduler: Scheduler::start(timings, drainer),
            }
        });

        Self { inner }
    }

    /// Re-seed the credential provider from the persisted sync config
    ///
    /// Returns whether sync is enabled. Runs no round.
    pub fn load(&self) -> Result<bool> {
        let config = self.inner.store.sync_config()?;
        self.inner.credentials.restore(persisted_credential(&config));
        Ok(config.enabled)
    }

    /// Restore persisted credentials and, when enabled, sync on load
    ///
    /// The load round runs whether or not operations are queued, so changes
    /// made on other devices are pulled.
    pub async fn start(&self) -> Result<DrainOutcome> {
        let config = self.inner.store.sync_config()?;
        if !self.load()? {
            tracing::debug!("Sync disabled, nothing to do on load");
            return Ok(DrainOutcome::Skipped(SkipReason::Disabled));
        }

        tracing::info!(
            pending = config.pending_operations.len(),
            authenticated = self.inner.credentials.has_valid_token(),
            "Sync enabled, syncing on load"
        );
        self.inner.queue.enqueue(SyncReason::AppLoad)?;
        self.inner.drain(true).await
    }

    /// Run the consent flow, mark sync enabled and perform the initial round
    ///
    /// Fails fast with [`SyncError::SyncInProgress`] while a round runs. On any
    /// other failure the credential and the sync config go back to what they
    /// were before the call, except that local changes made meanwhile survive:
    /// the change time never moves backwards, and operations queued during the
    /// attempt are kept when sync was already enabled.
    pub async fn enable_sync(&self) -> Result<SyncReport> {
        let inner = &self.inner;
        if inner.in_flight.load(Ordering::Acquire) {
            return Err(SyncError::SyncInProgress);
        }
        let config_before = inner.store.sync_config()?;
        let credential_before = inner.credentials.current();

        match inner.enable().await {
            Ok(report) => {
                tracing::info!(direction = ?report.direction, "Sync enabled");
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Enabling sync failed, reverting");
                if let Err(cancel) = inner.scheduler.cancel_timers() {
                    tracing::warn!(error = %cancel, "Could not cancel sync timers");
                }
                inner.credentials.restore(credential_before);
                inner.store.update_sync_config(|config| {
                    let latest_change = config
                        .last_local_change_time
                        .max(config_before.last_local_change_time);
                    let queued = std::mem::take(&mut config.pending_operations);
                    *config = config_before.clone();
                    config.last_local_change_time = latest_change;
                    if config.enabled {
                        config.pending_operations = queued;
                    }
                })?;
                if config_before.enabled {
                    // still enabled: resume through connectivity polling
                    inner.set_state(SyncState::Error);
                    inner.scheduler.start_polling()?;
                } else {
                    inner.set_state(SyncState::Idle);
                }
                Err(e)
            }
        }
    }

    /// Stop syncing, optionally deleting the remote document first
    ///
    /// A failed delete aborts before anything local is cleared.
    pub async fn disable_sync(&self, delete_remote: bool) -> Result<()> {
        let inner = &self.inner;
        let config = inner.store.sync_config()?;

        if delete_remote {
            if let Some(file_id) = &config.remote_file_id {
                inner.remote.delete(file_id).await?;
                tracing::info!(file_id = %file_id, "Remote file deleted");
            }
        }

        inner.scheduler.cancel_timers()?;
        inner.credentials.revoke().await?;
        inner.store.clear_sync_config()?;
        inner.set_state(SyncState::Idle);
        tracing::info!(delete_remote, "Sync disabled");
        Ok(())
    }

    /// Sync now, bypassing the debounce timer
    pub async fn manual_sync(&self) -> Result<SyncReport> {
        let inner = &self.inner;
        if !inner.store.sync_config()?.enabled {
            return Err(SyncError::NotEnabled);
        }
        if inner.in_flight.load(Ordering::Acquire) {
            return Err(SyncError::SyncInProgress);
        }

        inner.queue.enqueue(SyncReason::Manual)?;
        match inner.drain(true).await? {
            DrainOutcome::Synced(report) => Ok(report),
            DrainOutcome::Skipped(reason) => Err(reason.into_error()),
        }
    }

    /// Queue a sync for `reason`; the drain happens after the debounce window
    pub fn trigger_sync(&self, reason: SyncReason) -> Result<()> {
        self.inner.trigger(reason)
    }

    pub fn status(&self) -> Result<SyncStatusReport> {
        let config = self.inner.store.sync_config()?;
        Ok(SyncStatusReport {
            enabled: config.enabled,
            status: self.inner.state(),
            last_sync_time: config.last_sync_time,
            is_authenticated: self.inner.credentials.has_valid_token(),
            pending_count: config.pending_operations.len(),
            last_error: config.last_error,
        })
    }

    pub fn pending_conflict(&self) -> Option<ConflictInfo> {
        self.inner.resolver.pending()
    }

    /// Route every future conflict to the returned decider
    pub fn set_conflict_decider(&self) -> ConflictDecider {
        self.inner.resolver.register_decider()
    }

    pub fn clear_conflict_decider(&self) {
        self.inner.resolver.clear_decider();
    }

    /// A trigger that does not keep the engine alive
    pub fn trigger_handle(&self) -> Arc<dyn SyncTrigger> {
        Arc::new(SyncTriggerHandle {
            inner: Arc::downgrade(&self.inner),
        })
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.inner.telemetry.stats()
    }

    /// Stop the scheduler; queued operations stay persisted
    pub fn shutdown(&self) {
        if self.inner.scheduler.stop().is_ok() {
            tracing::info!("Sync engine shut down");
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.inner.scheduler.stop();
    }
}

/// [`SyncTrigger`] backed by a weak engine reference
pub struct SyncTriggerHandle {
    inner: Weak<EngineInner>,
}

impl SyncTrigger for SyncTriggerHandle {
    fn trigger(&self, reason: SyncReason) {
        let Some(inner) = self.inner.upgrade() else {
            tracing::debug!(%reason, "Sync engine gone, trigger ignored");
            return;
        };
        if let Err(e) = inner.trigger(reason) {
            tracing::warn!(%reason, error = %e, "Failed to queue sync");
        }
    }
}

fn persisted_credential(config: &SyncConfig) -> Option<Credential> {
    match (&config.access_token, config.token_expiry) {
        (Some(token), Some(expires_at)) => Some(Credential {
            access_token: token.clone(),
            expires_at,
        }),
        _ => None,
    }
}

impl EngineInner {
    fn state(&self) -> SyncState {
        *self.state.lock()
    }

    fn set_state(&self, next: SyncState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Sync state changed");
        }
    }

    fn trigger(&self, reason: SyncReason) -> Result<()> {
        if let Some(op) = self.queue.enqueue(reason)? {
            tracing::debug!(%reason, op_id = %op.id, "Sync operation queued");
            self.scheduler.debounce()?;
        }
        Ok(())
    }

    async fn enable(&self) -> Result<SyncReport> {
        let credential = self.credentials.acquire().await?;
        self.store.update_sync_config(|config| {
            config.enabled = true;
            config.access_token = Some(credential.access_token.clone());
            config.token_expiry = Some(credential.expires_at);
            config.last_error = None;
        })?;
        self.queue.enqueue(SyncReason::Manual)?;

        // the initial round is forced even if the host reports offline
        match self.drain(false).await? {
            DrainOutcome::Synced(report) => Ok(report),
            DrainOutcome::Skipped(reason) => Err(reason.into_error()),
        }
    }

    /// Gate checks, then one round
    ///
    /// `check_network` consults the host hint; the credential is always
    /// checked.
    async fn drain(&self, check_network: bool) -> Result<DrainOutcome> {
        let config = self.store.sync_config()?;
        if !config.enabled {
            return Ok(DrainOutcome::Skipped(SkipReason::Disabled));
        }

        let Some(_guard) = RoundGuard::try_acquire(&self.in_flight) else {
            tracing::debug!("Sync round already in flight");
            return Ok(DrainOutcome::Skipped(SkipReason::InFlight));
        };

        if check_network && !self.network.is_online() {
            tracing::info!("Offline, suspending sync");
            self.set_state(SyncState::Offline);
            self.scheduler.start_polling()?;
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }

        if !self.credentials.has_valid_token() {
            tracing::warn!("Credential missing or expiring, suspending sync");
            self.store
                .update_sync_config(|c| c.last_error = Some(AUTH_EXPIRED_MESSAGE.to_string()))?;
            self.set_state(SyncState::Error);
            self.scheduler.start_polling()?;
            return Ok(DrainOutcome::Skipped(SkipReason::CredentialInvalid));
        }

        self.scheduler.stop_polling()?;

        let captured = self.queue.capture()?;
        if captured.is_empty() {
            self.set_state(SyncState::Idle);
            return Ok(DrainOutcome::Skipped(SkipReason::NothingQueued));
        }

        self.set_state(SyncState::Syncing);
        tracing::info!(pending = captured.len(), "Sync round started");

        match self.execute_round(&captured).await {
            Ok(round) => self.finish_round(&captured, round),
            Err(e) => {
                self.record_failure(&e)?;
                Err(e)
            }
        }
    }

    fn finish_round(&self, captured: &HashSet<String>, round: Round) -> Result<DrainOutcome> {
        let report = round.report;

        if report.resolution == ResolutionKind::Cancelled {
            tracing::info!(pending = captured.len(), "Conflict cancelled, queue kept");
            self.set_state(SyncState::Idle);
            return Ok(DrainOutcome::Synced(report));
        }

        let done = self.queue.complete_round(captured, round.uploaded_at)?;
        self.set_state(SyncState::Idle);
        tracing::info!(
            direction = ?report.direction,
            resolution = ?report.resolution,
            cleared = done.cleared,
            "Sync round completed"
        );

        if done.arrived_during_round > 0 {
            tracing::debug!(
                pending = done.arrived_during_round,
                "Operations arrived during the round, debouncing again"
            );
            self.scheduler.debounce()?;
        }
        Ok(DrainOutcome::Synced(report))
    }

    fn record_failure(&self, error: &SyncError) -> Result<()> {
        if error.is_offline() {
            self.queue.fail_round(&error.to_string())?;
            self.set_state(SyncState::Offline);
            tracing::warn!(error = %error, "Remote unreachable, polling for connectivity");
            return self.scheduler.start_polling();
        }

        if error.is_auth() {
            self.queue.fail_round(AUTH_EXPIRED_MESSAGE)?;
            self.set_state(SyncState::Error);
            tracing::warn!(error = %error, "Authentication failed, waiting for re-authentication");
            return self.scheduler.start_polling();
        }

        let failures = self.queue.fail_round(&error.to_string())?;
        let delay = self.settings.round_backoff(failures);
        self.set_state(SyncState::Error);
        tracing::error!(
            error = %error,
            kind = error.kind(),
            failures,
            retry_in_secs = delay.as_secs(),
            "Sync round failed"
        );
        self.scheduler.retry_in(delay)
    }

    async fn execute_round(&self, captured: &HashSet<String>) -> Result<Round> {
        let config = self.store.sync_config()?;
        let local_time = config.last_local_change_time;

        let remote = match self.resolve_remote(config.remote_file_id, local_time).await? {
            RemoteFile::Existing(meta) => meta,
            RemoteFile::Created(meta) => return Ok(Round::uploaded(ResolutionKind::Created, &meta)),
        };

        match self.resolver.plan(local_time, remote.modified_at) {
            Plan::Same => {
                tracing::debug!(
                    local = %local_time,
                    remote = %remote.modified_at,
                    "Already in sync"
                );
                Ok(Round::new(SyncDirection::None, ResolutionKind::Same))
            }
            Plan::Upload => {
                let snapshot = self.capture(local_time)?;
                let meta = self.remote.write(&remote.id, &snapshot).await?;
                Ok(Round::uploaded(ResolutionKind::LocalNewer, &meta))
            }
            Plan::Download => {
                let snapshot = self.remote.read(&remote.id).await?;
                self.apply_remote(captured, &snapshot, remote.modified_at)?;
                Ok(Round::new(SyncDirection::Download, ResolutionKind::RemoteNewer))
            }
            Plan::AskDecider => self.decide(captured, &remote, local_time).await,
        }
    }

    /// Remembered file, else discovered file, else a new file from local data
    async fn resolve_remote(
        &self,
        remembered: Option<FileId>,
        local_time: DateTime<Utc>,
    ) -> Result<RemoteFile> {
        if let Some(file_id) = remembered {
            match self.remote.metadata(&file_id).await {
                Ok(meta) => return Ok(RemoteFile::Existing(meta)),
                Err(SyncError::NotFound(_)) => {
                    tracing::warn!(
                        file_id = %file_id,
                        "Remembered remote file is gone, rediscovering"
                    );
                    self.store.update_sync_config(|c| c.remote_file_id = None)?;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(file_id) = self.remote.locate().await? {
            self.remember_file(&file_id)?;
            let meta = self.remote.metadata(&file_id).await?;
            return Ok(RemoteFile::Existing(meta));
        }

        let snapshot = self.capture(local_time)?;
        let meta = self.remote.create(&snapshot).await?;
        self.remember_file(&meta.id)?;
        tracing::info!(file_id = %meta.id, "Created remote file");
        Ok(RemoteFile::Created(meta))
    }

    fn remember_file(&self, file_id: &str) -> Result<()> {
        self.store
            .update_sync_config(|c| c.remote_file_id = Some(file_id.to_string()))
    }

    fn capture(&self, local_time: DateTime<Utc>) -> Result<AppDataSnapshot> {
        AppDataSnapshot::capture(&self.store, &self.settings.app_version, local_time)
    }

    fn apply_remote(
        &self,
        captured: &HashSet<String>,
        snapshot: &AppDataSnapshot,
        remote_time: DateTime<Utc>,
    ) -> Result<()> {
        let adopted = self.store.apply_sync_payload_then(&snapshot.data, || {
            self.queue.adopt_remote_time(captured, remote_time)
        })?;
        if !adopted {
            tracing::debug!("Local edits arrived during download, keeping local change time");
        }
        Ok(())
    }

    async fn decide(
        &self,
        captured: &HashSet<String>,
        remote: &RemoteMetadata,
        local_time: DateTime<Utc>,
    ) -> Result<Round> {
        let local_snapshot = self.capture(local_time)?;
        let remote_snapshot = self.remote.read(&remote.id).await?;

        let info = ConflictInfo {
            local_timestamp: local_time,
            remote_timestamp: remote.modified_at,
            remote_file_id: remote.id.clone(),
            local_snapshot: local_snapshot.clone(),
            remote_snapshot: remote_snapshot.clone(),
        };

        match self.resolver.ask(info).await {
            ConflictChoice::KeepLocal => {
                let meta = self.remote.write(&remote.id, &local_snapshot).await?;
                Ok(Round::uploaded(ResolutionKind::Manual, &meta))
            }
            ConflictChoice::KeepRemote => {
                self.apply_remote(captured, &remote_snapshot, remote.modified_at)?;
                Ok(Round::new(SyncDirection::Download, ResolutionKind::Manual))
            }
            ConflictChoice::Cancel => {
                Ok(Round::new(SyncDirection::None, ResolutionKind::Cancelled))
            }
        }
    }
}

#[async_trait]
impl QueueDrainer for EngineInner {
    async fn drain_queue(&self) {
        match self.drain(true).await {
            Ok(DrainOutcome::Synced(report)) => {
                tracing::debug!(resolution = ?report.resolution, "Scheduled drain finished");
            }
            Ok(DrainOutcome::Skipped(reason)) => {
                tracing::debug!(?reason, "Scheduled drain skipped");
            }
            Err(e) => tracing::debug!(error = %e, "Scheduled drain failed"),
        }
    }

    async fn check_reachable(&self) -> bool {
        if !self.network.is_online() || !self.credentials.has_valid_token() {
            return false;
        }

        let remembered = match self.store.sync_config() {
            Ok(config) => config.remote_file_id,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read sync config for connectivity check");
                return false;
            }
        };

        let reached = match remembered {
            Some(file_id) => self.direct_remote.metadata(&file_id).await.map(|_| ()),
            None => self.direct_remote.locate().await.map(|_| ()),
        };

        match reached {
            // the remote answered, even if the file is gone
            Ok(()) | Err(SyncError::NotFound(_)) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Connectivity check failed");
                false
            }
        }
    }
}
