//! Vocabulary, progress and settings mutations
//!
//! Every change is written to local storage first; only a successful write
//! notifies the [`SyncTrigger`]. A local write failure, including a full
//! store, surfaces to the caller and queues nothing.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Result, SyncError};
use crate::storage::AppStore;
use crate::sync::{ExportData, SyncTrigger};
use crate::types::{
    AppSettings, NewWord, StudyMode, SyncReason, SyncedSettings, Theme, UserProgress, Word,
};

/// Owner of every local entity mutation
///
/// Each edit holds [`AppStore::lock_data`] from its read until its trigger is
/// queued, so a download applied concurrently lands either wholly before the
/// edit or wholly after its operation is recorded.
pub struct Library {
    store: Arc<AppStore>,
    sync: Arc<dyn SyncTrigger>,
}

impl Library {
    pub fn new(store: Arc<AppStore>, sync: Arc<dyn SyncTrigger>) -> Self {
        Self { store, sync }
    }

    pub fn words(&self) -> Result<Vec<Word>> {
        self.store.words()
    }

    pub fn add_word(&self, new: NewWord) -> Result<Word> {
        let now = Utc::now();
        let word = Word {
            id: uuid::Uuid::new_v4().to_string(),
            japanese: new.japanese,
            romanji: new.romanji,
            english: new.english,
            day: new.day,
            kind: new.kind,
            mastered: false,
            needs_review: false,
            review_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            last_reviewed: now,
            created_at: now,
            last_modified: Some(now.timestamp_millis()),
        };
        word.validate().map_err(SyncError::InvalidInput)?;

        let _guard = self.store.lock_data();
        let mut words = self.store.words()?;
        words.push(word.clone());
        self.save_words(&words)?;
        tracing::debug!(id = %word.id, "Word added");
        self.sync.trigger(SyncReason::WordChange);
        Ok(word)
    }

    /// Apply `edit` to one word; fails if the result is no longer valid
    pub fn update_word(&self, id: &str, edit: impl FnOnce(&mut Word)) -> Result<Word> {
        let _guard = self.store.lock_data();
        let mut words = self.store.words()?;
        let word = words
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| SyncError::InvalidInput(format!("no word with id {id}")))?;

        edit(word);
        word.id = id.to_string();
        word.last_modified = Some(Utc::now().timestamp_millis());
        word.validate().map_err(SyncError::InvalidInput)?;
        let updated = word.clone();

        self.save_words(&words)?;
        self.sync.trigger(SyncReason::WordChange);
        Ok(updated)
    }

    /// Returns whether a word was removed
    pub fn delete_word(&self, id: &str) -> Result<bool> {
        let _guard = self.store.lock_data();
        let mut words = self.store.words()?;
        let before = words.len();
        words.retain(|w| w.id != id);
        if words.len() == before {
            return Ok(false);
        }

        self.save_words(&words)?;
        self.sync.trigger(SyncReason::WordChange);
        Ok(true)
    }

    /// Count a quiz answer against a word
    pub fn record_review(&self, id: &str, correct: bool) -> Result<Word> {
        let word = self.update_word(id, |w| {
            w.review_count += 1;
            if correct {
                w.correct_count += 1;
            } else {
                w.incorrect_count += 1;
                w.needs_review = true;
            }
            w.last_reviewed = Utc::now();
        })?;
        self.update_progress(|p| p.last_study_date = Utc::now())?;
        Ok(word)
    }

    pub fn progress(&self) -> Result<UserProgress> {
        self.store.progress()
    }

    pub fn increment_score(&self, mode: StudyMode, correct: bool) -> Result<UserProgress> {
        self.update_progress(|p| {
            let score = p.session_score.mode_mut(mode);
            if correct {
                score.correct += 1;
            } else {
                score.incorrect += 1;
            }
            p.last_study_date = Utc::now();
        })
    }

    pub fn update_progress(&self, edit: impl FnOnce(&mut UserProgress)) -> Result<UserProgress> {
        let _guard = self.store.lock_data();
        let mut progress = self.store.progress()?;
        edit(&mut progress);
        self.store.save_progress(&progress)?;
        self.sync.trigger(SyncReason::ProgressChange);
        Ok(progress)
    }

    pub fn settings(&self) -> Result<AppSettings> {
        self.store.settings()
    }

    pub fn update_settings(&self, edit: impl FnOnce(&mut SyncedSettings)) -> Result<AppSettings> {
        let _guard = self.store.lock_data();
        let mut settings = self.store.settings()?;
        edit(&mut settings.synced);
        settings.synced.last_modified = Some(Utc::now().timestamp_millis());
        self.store.save_settings(&settings)?;
        self.sync.trigger(SyncReason::SettingsChange);
        Ok(settings)
    }

    /// Device-local; never synced
    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        let _guard = self.store.lock_data();
        let mut settings = self.store.settings()?;
        settings.theme = theme;
        self.store.save_settings(&settings)
    }

    /// Backup of the synced data, theme excluded
    pub fn export_data(&self) -> Result<ExportData> {
        Ok(ExportData::new(self.store.sync_payload()?))
    }

    /// Replace local data with a backup file, keeping this device's theme
    pub fn import_data(&self, json: &str) -> Result<ExportData> {
        let export = ExportData::parse(json)?;
        self.store.apply_sync_payload(&export.data)?;
        tracing::info!(
            words = export.data.words.len(),
            exported_at = %export.export_date,
            "Backup imported"
        );
        self.sync.trigger(SyncReason::WordChange);
        self.sync.trigger(SyncReason::ProgressChange);
        self.sync.trigger(SyncReason::SettingsChange);
        Ok(export)
    }

    /// Save words and keep the derived progress counters in step
    fn save_words(&self, words: &[Word]) -> Result<()> {
        self.store.save_words(words)?;
        let mut progress = self.store.progress()?;
        progress.recount(words);
        self.store.save_progress(&progress)
    }
}
