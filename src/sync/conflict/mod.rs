//! Conflict detection and resolution between local data and the remote file
//!
//! Provides:
//! - Timestamp comparison with a clock-drift tolerance
//! - Automatic last-write-wins when no decider is registered
//! - A single-slot request/response channel for manual decisions
//!
//! Order of evaluation is fixed: equal-within-tolerance first, then the
//! manual decider if one is registered, then last-write-wins. Automatic
//! resolution never runs while a decider is registered.

mod detector;
mod resolver;

pub use detector::{ConflictDetector, Verdict};
pub use resolver::{ConflictDecider, ConflictRequest, ConflictResolver, Plan};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::AppDataSnapshot;

/// A divergence waiting for a manual decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub local_timestamp: DateTime<Utc>,
    pub remote_timestamp: DateTime<Utc>,
    pub remote_file_id: String,
    pub local_snapshot: AppDataSnapshot,
    pub remote_snapshot: AppDataSnapshot,
}

/// Answer from a manual decider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictChoice {
    /// Upload the local snapshot over the remote file
    KeepLocal,
    /// Apply the remote snapshot locally
    KeepRemote,
    /// Transfer nothing; the queue stays for a later round
    Cancel,
}
