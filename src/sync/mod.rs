//! Synchronization of the local application data with one remote JSON file
//!
//! # Feature Flags
//!
//! The Google Drive adapter requires the `drive` feature (on by default).
//! Everything else, including the in-memory remote store, is always available.

pub mod conflict;
pub mod credentials;
#[cfg(feature = "drive")]
pub mod drive;
pub mod engine;
pub mod network;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod snapshot;
pub mod worker;

pub use conflict::{ConflictChoice, ConflictDecider, ConflictInfo, ConflictRequest};
pub use credentials::{
    ConsentFlow, Credential, CredentialProvider, NoConsentFlow, StaticTokenFlow, TokenCredentials,
    TokenGrant, TokenRevoker,
};
#[cfg(feature = "drive")]
pub use drive::{DriveConfig, GoogleDriveStore, GoogleTokenRevoker};
pub use engine::{DrainOutcome, SkipReason, SyncEngine, SyncTrigger};
pub use network::{AlwaysOnline, NetworkFlag, NetworkStatus};
pub use queue::SyncQueue;
pub use remote::{
    FileId, InjectedFailure, MemoryBlobStore, RemoteBlobStore, RemoteMetadata, RemoteOp,
};
pub use retry::{RetryPolicy, RetryStats, RetryingStore};
pub use snapshot::{AppDataSnapshot, ExportData, SyncPayload};
