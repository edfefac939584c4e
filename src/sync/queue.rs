//! Durable queue of sync requests, persisted inside the sync config
//!
//! The queue is a "sync needed" flag with history: a successful round clears
//! every operation it saw, a failed round bumps every retry counter. Items are
//! never replayed individually.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::storage::AppStore;
use crate::types::{PendingSyncOperation, SyncReason};

/// Bookkeeping produced by [`SyncQueue::complete_round`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundCompletion {
    /// Operations cleared by this round
    pub cleared: usize,
    /// Operations enqueued while the round was running, still queued
    pub arrived_during_round: usize,
}

pub struct SyncQueue {
    store: Arc<AppStore>,
}

impl SyncQueue {
    pub fn new(store: Arc<AppStore>) -> Self {
        Self { store }
    }

    /// Record a trigger
    ///
    /// Local edits always advance the local change time. An operation is only
    /// queued while sync is enabled; `None` means nothing was queued.
    pub fn enqueue(&self, reason: SyncReason) -> Result<Option<PendingSyncOperation>> {
        let now = Utc::now();
        self.store.update_sync_config(|config| {
            if reason.is_local_mutation() {
                config.touch_local_change(now);
            }
            if !config.enabled {
                return None;
            }
            let op = PendingSyncOperation::new(reason);
            config.pending_operations.push(op.clone());
            Some(op)
        })
    }

    pub fn pending(&self) -> Result<Vec<PendingSyncOperation>> {
        Ok(self.store.sync_config()?.pending_operations)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Ids of everything queued right now, taken when a round starts
    pub fn capture(&self) -> Result<HashSet<String>> {
        Ok(self.pending()?.into_iter().map(|op| op.id).collect())
    }

    /// Clear the captured operations after a successful round
    ///
    /// Resets the failure counter and error. When nothing new arrived during
    /// the round, the local change time may adopt `remote_modified` so the
    /// file just uploaded is not seen as newer than local data next round.
    pub fn complete_round(
        &self,
        captured: &HashSet<String>,
        remote_modified: Option<DateTime<Utc>>,
    ) -> Result<RoundCompletion> {
        let now = Utc::now();
        self.store.update_sync_config(|config| {
            let before = config.pending_operations.len();
            config
                .pending_operations
                .retain(|op| !captured.contains(&op.id));
            let remaining = config.pending_operations.len();

            config.failure_count = 0;
            config.last_error = None;
            config.last_sync_time = Some(now);

            if remaining == 0 {
                if let Some(remote) = remote_modified {
                    config.touch_local_change(remote);
                }
            }

            RoundCompletion {
                cleared: before - remaining,
                arrived_during_round: remaining,
            }
        })
    }

    /// Record a failed round; returns the new consecutive failure count
    pub fn fail_round(&self, error: &str) -> Result<u32> {
        self.store.update_sync_config(|config| {
            config.failure_count = config.failure_count.saturating_add(1);
            config.last_error = Some(error.to_string());
            for op in &mut config.pending_operations {
                op.retry_count = op.retry_count.saturating_add(1);
            }
            config.failure_count
        })
    }

    /// Adopt the remote modification time after applying remote data
    ///
    /// Skipped when operations outside `captured` exist, so an edit made while
    /// the download ran still counts as newer. Returns whether it was adopted.
    pub fn adopt_remote_time(
        &self,
        captured: &HashSet<String>,
        remote_modified: DateTime<Utc>,
    ) -> Result<bool> {
        self.store.update_sync_config(|config| {
            let late = config
                .pending_operations
                .iter()
                .any(|op| !captured.contains(&op.id));
            if !late {
                config.last_local_change_time = remote_modified;
            }
            !late
        })
    }
}
