//! Host connectivity hint

use std::sync::atomic::{AtomicBool, Ordering};

/// Connectivity as reported by the host platform
///
/// Only a hint: `false` suspends draining, but `true` is always confirmed by
/// a real remote call before a suspended queue resumes.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// For hosts without a connectivity signal
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkStatus for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A flag the host flips from its own online/offline events
#[derive(Debug)]
pub struct NetworkFlag {
    online: AtomicBool,
}

impl NetworkFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::AcqRel);
        if was != online {
            tracing::info!(online, "Network status changed");
        }
    }
}

impl Default for NetworkFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for NetworkFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}
