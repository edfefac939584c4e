//! Resolution planning and the manual decision channel

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{ConflictChoice, ConflictDetector, ConflictInfo, Verdict};

/// What the sync round should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Same,
    Upload,
    Download,
    /// Fetch both snapshots and wait for the registered decider
    AskDecider,
}

/// One conflict handed to the decider
pub struct ConflictRequest {
    info: ConflictInfo,
    reply: oneshot::Sender<ConflictChoice>,
}

impl ConflictRequest {
    pub fn info(&self) -> &ConflictInfo {
        &self.info
    }

    /// Answer the conflict; dropping the request instead counts as cancel
    pub fn respond(self, choice: ConflictChoice) {
        if self.reply.send(choice).is_err() {
            tracing::debug!(?choice, "Conflict answer arrived after the round ended");
        }
    }
}

/// Receiving end held by whoever makes manual decisions
pub struct ConflictDecider {
    receiver: mpsc::Receiver<ConflictRequest>,
}

impl ConflictDecider {
    /// Wait for the next conflict; `None` once the decider is unregistered
    pub async fn next(&mut self) -> Option<ConflictRequest> {
        self.receiver.recv().await
    }
}

/// Decides sync direction and brokers manual decisions
pub struct ConflictResolver {
    detector: ConflictDetector,
    decider: Mutex<Option<mpsc::Sender<ConflictRequest>>>,
    pending: Mutex<Option<ConflictInfo>>,
}

/// Clears the pending slot when a decision finishes or the round is dropped
struct PendingSlot<'a>(&'a Mutex<Option<ConflictInfo>>);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl ConflictResolver {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            detector: ConflictDetector::new(tolerance),
            decider: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Register a manual decider, replacing any previous one
    pub fn register_decider(&self) -> ConflictDecider {
        let (sender, receiver) = mpsc::channel(1);
        *self.decider.lock() = Some(sender);
        tracing::debug!("Manual conflict decider registered");
        ConflictDecider { receiver }
    }

    /// Return to automatic last-write-wins
    pub fn clear_decider(&self) {
        self.decider.lock().take();
    }

    pub fn has_decider(&self) -> bool {
        self.decider.lock().is_some()
    }

    /// The conflict currently awaiting a decision, if any
    pub fn pending(&self) -> Option<ConflictInfo> {
        self.pending.lock().clone()
    }

    /// Equality check, then manual decider, then last-write-wins
    pub fn plan(&self, local: DateTime<Utc>, remote: DateTime<Utc>) -> Plan {
        match self.detector.compare(local, remote) {
            Verdict::Same => Plan::Same,
            _ if self.has_decider() => Plan::AskDecider,
            Verdict::LocalNewer => Plan::Upload,
            Verdict::RemoteNewer => Plan::Download,
        }
    }

    /// Hand a conflict to the decider and wait for its answer
    ///
    /// A missing or dropped decider, or a dropped request, counts as
    /// [`ConflictChoice::Cancel`].
    ///
    /// # Panics
    ///
    /// If another conflict is still awaiting a decision. Rounds are serialized,
    /// so this only happens on misuse.
    pub async fn ask(&self, info: ConflictInfo) -> ConflictChoice {
        let sender = self.decider.lock().clone();
        let Some(sender) = sender else {
            return ConflictChoice::Cancel;
        };

        {
            let mut pending = self.pending.lock();
            assert!(pending.is_none(), "a conflict is already awaiting a decision");
            *pending = Some(info.clone());
        }
        let _slot = PendingSlot(&self.pending);

        tracing::info!(
            local = %info.local_timestamp,
            remote = %info.remote_timestamp,
            file_id = %info.remote_file_id,
            "Waiting for manual conflict decision"
        );

        let (reply, answer) = oneshot::channel();
        if sender.send(ConflictRequest { info, reply }).await.is_err() {
            tracing::warn!("Conflict decider is gone, cancelling");
            return ConflictChoice::Cancel;
        }

        let choice = answer.await.unwrap_or(ConflictChoice::Cancel);
        tracing::info!(?choice, "Conflict decided");
        choice
    }
}
