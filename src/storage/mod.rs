//! Local persistence for the vocabulary library and sync state
//!
//! Everything is stored as JSON values under a handful of well-known keys.
//! [`KeyValueStore`] is the primitive (atomic per key, synchronous);
//! [`AppStore`] layers typed accessors and the sync-config read-modify-write
//! on top of it.

mod app;
mod file;
mod memory;

pub use app::AppStore;
pub use file::FileStore;
pub use memory::MemoryStore;

use serde_json::Value;

use crate::error::Result;

/// Storage keys shared with the web client
pub mod keys {
    pub const WORDS: &str = "jp-learn-words";
    pub const PROGRESS: &str = "jp-learn-progress";
    pub const SETTINGS: &str = "jp-learn-settings";
    pub const SYNC_CONFIG: &str = "jp-learn-sync-config";
}

/// Atomic per-key JSON storage
///
/// Writes may fail with [`SyncError::QuotaExceeded`](crate::error::SyncError::QuotaExceeded);
/// callers surface that to whoever performed the write.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: &Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}
