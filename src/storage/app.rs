//! Typed access to the application keys

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{keys, KeyValueStore};
use crate::error::Result;
use crate::sync::snapshot::SyncPayload;
use crate::types::{AppSettings, SyncConfig, Theme, UserProgress, Word};

/// Typed wrapper over a [`KeyValueStore`]
///
/// Sync-config updates go through [`AppStore::update_sync_config`], which holds
/// a lock across the read-modify-write so concurrent triggers cannot lose
/// queued operations.
///
/// Words, progress and settings share a second lock. Local edits hold it via
/// [`AppStore::lock_data`] for their whole read-modify-write, and applying a
/// downloaded payload takes it too, so neither can interleave with the other.
/// Lock order is data, then config.
pub struct AppStore {
    kv: Arc<dyn KeyValueStore>,
    config_lock: Mutex<()>,
    data_lock: Mutex<()>,
}

impl AppStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            config_lock: Mutex::new(()),
            data_lock: Mutex::new(()),
        }
    }

    /// Exclusive access to the synced entities for a read-modify-write
    ///
    /// Not reentrant: do not call [`AppStore::apply_sync_payload`] while holding it.
    pub fn lock_data(&self) -> MutexGuard<'_, ()> {
        self.data_lock.lock()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.kv.set(key, &value)
    }

    pub fn words(&self) -> Result<Vec<Word>> {
        Ok(self.read(keys::WORDS)?.unwrap_or_default())
    }

    pub fn save_words(&self, words: &[Word]) -> Result<()> {
        self.write(keys::WORDS, &words)
    }

    pub fn progress(&self) -> Result<UserProgress> {
        Ok(self.read(keys::PROGRESS)?.unwrap_or_default())
    }

    pub fn save_progress(&self, progress: &UserProgress) -> Result<()> {
        self.write(keys::PROGRESS, progress)
    }

    pub fn settings(&self) -> Result<AppSettings> {
        Ok(self.read(keys::SETTINGS)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        self.write(keys::SETTINGS, settings)
    }

    pub fn theme(&self) -> Result<Theme> {
        Ok(self.settings()?.theme)
    }

    pub fn sync_config(&self) -> Result<SyncConfig> {
        Ok(self.read(keys::SYNC_CONFIG)?.unwrap_or_default())
    }

    /// Replace the whole sync config
    pub fn save_sync_config(&self, config: &SyncConfig) -> Result<()> {
        let _guard = self.config_lock.lock();
        self.write(keys::SYNC_CONFIG, config)
    }

    /// Read-modify-write the sync config; nothing is written if `f` panics
    pub fn update_sync_config<T>(&self, f: impl FnOnce(&mut SyncConfig) -> T) -> Result<T> {
        let _guard = self.config_lock.lock();
        let mut config = self.sync_config()?;
        let out = f(&mut config);
        self.write(keys::SYNC_CONFIG, &config)?;
        Ok(out)
    }

    pub fn clear_sync_config(&self) -> Result<()> {
        let _guard = self.config_lock.lock();
        self.kv.remove(keys::SYNC_CONFIG)
    }

    /// Current synced data, with device-local fields stripped
    ///
    /// Takes the data lock, so the three keys are read from one consistent state.
    pub fn sync_payload(&self) -> Result<SyncPayload> {
        let _guard = self.data_lock.lock();
        Ok(SyncPayload {
            words: self.words()?,
            progress: self.progress()?,
            settings: self.settings()?.synced,
        })
    }

    /// Overwrite local data with a payload, keeping this device's theme
    pub fn apply_sync_payload(&self, payload: &SyncPayload) -> Result<()> {
        self.apply_sync_payload_then(payload, || Ok(()))
    }

    /// Apply a payload, then run `after` before any local edit can start
    pub fn apply_sync_payload_then<T>(
        &self,
        payload: &SyncPayload,
        after: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _guard = self.data_lock.lock();
        let theme = self.theme()?;
        self.save_words(&payload.words)?;
        self.save_progress(&payload.progress)?;
        self.save_settings(&AppSettings {
            theme,
            synced: payload.settings.clone().sanitized(),
        })?;
        tracing::debug!(words = payload.words.len(), "Applied synced data locally");
        after()
    }
}
