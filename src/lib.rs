//! jplearn - sync engine for a Japanese vocabulary app
//!
//! Keeps vocabulary, progress and settings in a local key-value store and
//! synchronizes them with a single JSON file in the user's cloud drive,
//! across devices, with no server of its own.

pub mod config;
pub mod error;
pub mod library;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::SyncSettings;
pub use error::{Result, SyncError};
pub use library::Library;
pub use storage::{AppStore, FileStore, KeyValueStore, MemoryStore};
pub use sync::SyncEngine;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
