//! Timestamp comparison

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of comparing local and remote modification times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Within tolerance; nothing to transfer
    Same,
    LocalNewer,
    RemoteNewer,
}

/// Conflict detector
pub struct ConflictDetector {
    /// Differences strictly below this are clock or rounding drift
    tolerance: Duration,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl ConflictDetector {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// Compare two modification times; the strictly greater one wins
    pub fn compare(&self, local: DateTime<Utc>, remote: DateTime<Utc>) -> Verdict {
        let diff = (local - remote).num_milliseconds().unsigned_abs();
        if u128::from(diff) < self.tolerance.as_millis() {
            Verdict::Same
        } else if local > remote {
            Verdict::LocalNewer
        } else {
            Verdict::RemoteNewer
        }
    }
}
