//! Remote blob store abstraction and an in-memory implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::credentials::CredentialProvider;
use super::snapshot::AppDataSnapshot;
use crate::error::{Result, SyncError};

/// Opaque identifier of the remote document
pub type FileId = String;

/// Metadata of the remote document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub id: FileId,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

/// One named JSON document in a cloud drive
///
/// Every operation needs a valid credential and fails with
/// [`SyncError::Auth`] otherwise.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Find the document by name
    async fn locate(&self) -> Result<Option<FileId>>;

    /// Create the document with `snapshot` as its content
    async fn create(&self, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata>;

    async fn read(&self, file_id: &str) -> Result<AppDataSnapshot>;

    /// Replace the document content
    async fn write(&self, file_id: &str, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata>;

    async fn metadata(&self, file_id: &str) -> Result<RemoteMetadata>;

    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Operation names, used to script failures in [`MemoryBlobStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Locate,
    Create,
    Read,
    Write,
    Metadata,
    Delete,
}

/// Error kinds [`MemoryBlobStore`] can be told to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Network,
    Unreachable,
    RateLimited,
    Auth,
    NotFound,
}

impl InjectedFailure {
    fn to_error(self, op: RemoteOp) -> SyncError {
        let msg = format!("injected failure for {op:?}");
        match self {
            InjectedFailure::Network => SyncError::Network(msg),
            InjectedFailure::Unreachable => SyncError::Unreachable(msg),
            InjectedFailure::RateLimited => SyncError::RateLimited(msg),
            InjectedFailure::Auth => SyncError::Auth(msg),
            InjectedFailure::NotFound => SyncError::NotFound(msg),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<FileId, StoredFile>,
    failures: HashMap<RemoteOp, VecDeque<InjectedFailure>>,
    calls: HashMap<RemoteOp, usize>,
    next_id: u64,
    /// Overrides the clock for the next write or create
    next_modified_at: Option<DateTime<Utc>>,
}

/// In-process remote store with scriptable failures
///
/// Behaves like a drive holding at most one document per name. Writes stamp
/// the document with the current time unless [`MemoryBlobStore::stamp_next_write`]
/// says otherwise.
#[derive(Clone)]
pub struct MemoryBlobStore {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl MemoryBlobStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            credentials: None,
        }
    }

    /// Require a valid token from `credentials` on every call
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Place a document directly, bypassing failures and credentials
    pub fn seed(&self, snapshot: &AppDataSnapshot, modified_at: DateTime<Utc>) -> FileId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
        state.files.insert(
            id.clone(),
            StoredFile {
                name: self.name.clone(),
                bytes,
                modified_at,
            },
        );
        id
    }

    /// Queue failures returned by the next calls of `op`, in order
    pub fn fail_next(&self, op: RemoteOp, failures: impl IntoIterator<Item = InjectedFailure>) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .extend(failures);
    }

    /// Use `at` instead of the clock for the next write or create
    pub fn stamp_next_write(&self, at: DateTime<Utc>) {
        self.state.lock().next_modified_at = Some(at);
    }

    pub fn set_modified_at(&self, file_id: &str, at: DateTime<Utc>) {
        if let Some(file) = self.state.lock().files.get_mut(file_id) {
            file.modified_at = at;
        }
    }

    /// Number of calls made to `op`, failed ones included
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Current content of a document, if it exists
    pub fn snapshot(&self, file_id: &str) -> Option<AppDataSnapshot> {
        let state = self.state.lock();
        let file = state.files.get(file_id)?;
        serde_json::from_slice(&file.bytes).ok()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    fn enter(&self, op: RemoteOp) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(failure) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(failure.to_error(op));
        }
        drop(state);

        if let Some(credentials) = &self.credentials {
            if !credentials.has_valid_token() {
                return Err(SyncError::Auth("no valid access token".to_string()));
            }
        }
        Ok(())
    }

    fn stamp(state: &mut MemoryState) -> DateTime<Utc> {
        state.next_modified_at.take().unwrap_or_else(Utc::now)
    }

    fn metadata_of(id: &str, file: &StoredFile) -> RemoteMetadata {
        RemoteMetadata {
            id: id.to_string(),
            modified_at: file.modified_at,
            size: file.bytes.len() as u64,
        }
    }
}

#[async_trait]
impl RemoteBlobStore for MemoryBlobStore {
    async fn locate(&self) -> Result<Option<FileId>> {
        self.enter(RemoteOp::Locate)?;
        let state = self.state.lock();
        let mut ids: Vec<&FileId> = state
            .files
            .iter()
            .filter(|(_, f)| f.name == self.name)
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids.first().map(|id| id.to_string()))
    }

    async fn create(&self, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        self.enter(RemoteOp::Create)?;
        let bytes = snapshot.to_vec()?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        let file = StoredFile {
            name: self.name.clone(),
            bytes,
            modified_at: Self::stamp(&mut state),
        };
        let meta = Self::metadata_of(&id, &file);
        state.files.insert(id, file);
        Ok(meta)
    }

    async fn read(&self, file_id: &str) -> Result<AppDataSnapshot> {
        self.enter(RemoteOp::Read)?;
        let bytes = {
            let state = self.state.lock();
            let file = state
                .files
                .get(file_id)
                .ok_or_else(|| SyncError::NotFound(file_id.to_string()))?;
            file.bytes.clone()
        };
        AppDataSnapshot::from_slice(&bytes)
    }

    async fn write(&self, file_id: &str, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        self.enter(RemoteOp::Write)?;
        let bytes = snapshot.to_vec()?;
        let mut state = self.state.lock();
        let modified_at = Self::stamp(&mut state);
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| SyncError::NotFound(file_id.to_string()))?;
        file.bytes = bytes;
        file.modified_at = modified_at;
        Ok(Self::metadata_of(file_id, file))
    }

    async fn metadata(&self, file_id: &str) -> Result<RemoteMetadata> {
        self.enter(RemoteOp::Metadata)?;
        let state = self.state.lock();
        state
            .files
            .get(file_id)
            .map(|f| Self::metadata_of(file_id, f))
            .ok_or_else(|| SyncError::NotFound(file_id.to_string()))
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.enter(RemoteOp::Delete)?;
        self.state
            .lock()
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| SyncError::NotFound(file_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::SyncPayload;
    use crate::types::{SyncedSettings, UserProgress};

    fn snapshot() -> AppDataSnapshot {
        AppDataSnapshot::new(
            SyncPayload {
                words: vec![],
                progress: UserProgress::default(),
                settings: SyncedSettings::default(),
            },
            "test",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_locate_read_delete() {
        let store = MemoryBlobStore::new("data.json");
        assert_eq!(store.locate().await.unwrap(), None);

        let meta = store.create(&snapshot()).await.unwrap();
        assert_eq!(store.locate().await.unwrap(), Some(meta.id.clone()));
        assert_eq!(store.read(&meta.id).await.unwrap().schema_version, "1.0");

        store.delete(&meta.id).await.unwrap();
        assert!(matches!(
            store.metadata(&meta.id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = MemoryBlobStore::new("data.json");
        store.fail_next(
            RemoteOp::Locate,
            [InjectedFailure::RateLimited, InjectedFailure::Network],
        );

        assert!(matches!(store.locate().await, Err(SyncError::RateLimited(_))));
        assert!(matches!(store.locate().await, Err(SyncError::Network(_))));
        assert!(store.locate().await.is_ok());
        assert_eq!(store.calls(RemoteOp::Locate), 3);
    }

    #[tokio::test]
    async fn test_stamped_write_time() {
        let store = MemoryBlobStore::new("data.json");
        let at = DateTime::from_timestamp_millis(42_000).unwrap();
        let id = store.seed(&snapshot(), Utc::now());

        store.stamp_next_write(at);
        let meta = store.write(&id, &snapshot()).await.unwrap();
        assert_eq!(meta.modified_at, at);
        assert_eq!(store.metadata(&id).await.unwrap().modified_at, at);
    }
}
