//! Core types for the vocabulary library and its sync state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A vocabulary entry (word or sentence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub id: String,
    /// Kanji, hiragana or katakana
    pub japanese: String,
    pub romanji: String,
    pub english: String,
    /// Study day this entry belongs to (1-indexed)
    pub day: u32,
    #[serde(rename = "type")]
    pub kind: WordKind,
    #[serde(default)]
    pub mastered: bool,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub correct_count: u32,
    #[serde(default)]
    pub incorrect_count: u32,
    pub last_reviewed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Epoch milliseconds of the last edit, absent on entries from older exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

impl Word {
    /// Latest point in time this entry was touched
    pub fn touched_at(&self) -> DateTime<Utc> {
        let edited = self
            .last_modified
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(self.created_at);
        edited.max(self.created_at).max(self.last_reviewed)
    }

    /// Same structural checks the import screen applies
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("word id must not be empty".to_string());
        }
        if self.japanese.trim().is_empty() {
            return Err(format!("word {} has empty japanese text", self.id));
        }
        if self.romanji.trim().is_empty() {
            return Err(format!("word {} has empty romanji", self.id));
        }
        if self.english.trim().is_empty() {
            return Err(format!("word {} has empty english text", self.id));
        }
        if self.day == 0 {
            return Err(format!("word {} has day 0", self.id));
        }
        Ok(())
    }
}

/// Word vs. sentence classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WordKind {
    #[default]
    Word,
    Sentence,
}

/// Input for a new vocabulary entry; ids and timestamps are assigned on insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWord {
    pub japanese: String,
    pub romanji: String,
    pub english: String,
    pub day: u32,
    pub kind: WordKind,
}

/// Correct/incorrect tally for one study mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeScore {
    pub correct: u32,
    pub incorrect: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScore {
    #[serde(alias = "wordMode")]
    pub alphabet_mode: ModeScore,
    pub sentence_mode: ModeScore,
    pub flashcard_mode: ModeScore,
}

/// Study modes that keep a session score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyMode {
    Alphabet,
    Sentence,
    Flashcard,
}

impl SessionScore {
    pub fn mode_mut(&mut self, mode: StudyMode) -> &mut ModeScore {
        match mode {
            StudyMode::Alphabet => &mut self.alphabet_mode,
            StudyMode::Sentence => &mut self.sentence_mode,
            StudyMode::Flashcard => &mut self.flashcard_mode,
        }
    }
}

/// Aggregate learning progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub total_words: u32,
    pub total_sentences: u32,
    pub mastered_words: u32,
    pub mastered_sentences: u32,
    pub words_needing_review: u32,
    pub current_day: u32,
    pub session_score: SessionScore,
    pub daily_streak: u32,
    pub last_study_date: DateTime<Utc>,
    /// Minutes
    pub total_study_time: u32,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            total_words: 0,
            total_sentences: 0,
            mastered_words: 0,
            mastered_sentences: 0,
            words_needing_review: 0,
            current_day: 1,
            session_score: SessionScore::default(),
            daily_streak: 0,
            // epoch until the first study session, so empty snapshots are stable
            last_study_date: DateTime::<Utc>::default(),
            total_study_time: 0,
        }
    }
}

impl UserProgress {
    /// Recompute the word-derived counters from the current word list
    pub fn recount(&mut self, words: &[Word]) {
        let (sentences, words_only): (Vec<&Word>, Vec<&Word>) =
            words.iter().partition(|w| w.kind == WordKind::Sentence);
        self.total_words = words_only.len() as u32;
        self.total_sentences = sentences.len() as u32;
        self.mastered_words = words_only.iter().filter(|w| w.mastered).count() as u32;
        self.mastered_sentences = sentences.iter().filter(|w| w.mastered).count() as u32;
        self.words_needing_review = words.iter().filter(|w| w.needs_review).count() as u32;
    }
}

/// Device-local colour scheme, never synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReviewMode {
    #[default]
    Sequential,
    Random,
    NeedsReviewFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FlashcardDirection {
    #[default]
    JapaneseToEnglish,
    EnglishToJapanese,
    Both,
}

/// The part of the settings that travels with the remote snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncedSettings {
    pub review_mode: ReviewMode,
    pub flashcard_direction: FlashcardDirection,
    pub show_study_mode_by_default: bool,
    pub claude_api_key: Option<String>,
    pub claude_model: Option<String>,
    pub cached_models: Vec<Value>,
    pub last_models_fetch: Option<i64>,
    pub last_export_date: Option<DateTime<Utc>>,
    pub data_version: String,
    /// Epoch milliseconds of the last settings edit
    pub last_modified: Option<i64>,
    /// Fields written by newer app versions, preserved untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SyncedSettings {
    fn default() -> Self {
        Self {
            review_mode: ReviewMode::default(),
            flashcard_direction: FlashcardDirection::default(),
            show_study_mode_by_default: true,
            claude_api_key: None,
            claude_model: None,
            cached_models: Vec::new(),
            last_models_fetch: None,
            last_export_date: None,
            data_version: "1.0".to_string(),
            last_modified: None,
            extra: Map::new(),
        }
    }
}

impl SyncedSettings {
    /// Drop device-local keys that older clients may have pushed
    pub fn sanitized(mut self) -> Self {
        self.extra.remove("theme");
        self
    }
}

/// Full settings as stored on this device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(flatten)]
    pub synced: SyncedSettings,
}

/// Why a sync was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncReason {
    WordChange,
    SettingsChange,
    ProgressChange,
    AppLoad,
    Manual,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::WordChange => "word-change",
            SyncReason::SettingsChange => "settings-change",
            SyncReason::ProgressChange => "progress-change",
            SyncReason::AppLoad => "app-load",
            SyncReason::Manual => "manual",
        }
    }

    /// Reasons that stand for an edit of local data
    pub fn is_local_mutation(&self) -> bool {
        matches!(
            self,
            SyncReason::WordChange | SyncReason::SettingsChange | SyncReason::ProgressChange
        )
    }
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued request for a sync round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub reason: SyncReason,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl PendingSyncOperation {
    pub fn new(reason: SyncReason) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reason,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Persisted sync state, exactly one per device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub enabled: bool,
    #[serde(alias = "googleAccessToken")]
    pub access_token: Option<String>,
    #[serde(alias = "googleTokenExpiry", with = "chrono::serde::ts_milliseconds_option")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(alias = "driveFileId")]
    pub remote_file_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_local_change_time: DateTime<Utc>,
    #[serde(alias = "pendingSyncOperations")]
    pub pending_operations: Vec<PendingSyncOperation>,
    #[serde(alias = "syncFailureCount")]
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl SyncConfig {
    /// Move the local change time forward, never backward
    pub fn touch_local_change(&mut self, at: DateTime<Utc>) {
        if at > self.last_local_change_time {
            self.last_local_change_time = at;
        }
    }
}

/// Displayed engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Error,
    Offline,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
            SyncState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull-based status for the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub enabled: bool,
    pub status: SyncState,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_authenticated: bool,
    pub pending_count: usize,
    pub last_error: Option<String>,
}

/// Which way data moved during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
    None,
}

/// How the round decided on its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionKind {
    /// No remote file existed; local data was uploaded as a new file
    Created,
    Same,
    LocalNewer,
    RemoteNewer,
    Manual,
    Cancelled,
}

/// Result of one completed sync round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub resolution: ResolutionKind,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(direction: SyncDirection, resolution: ResolutionKind) -> Self {
        Self {
            direction,
            resolution,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn word(id: &str, kind: WordKind, mastered: bool, needs_review: bool) -> Word {
        let now = Utc::now();
        Word {
            id: id.to_string(),
            japanese: "猫".to_string(),
            romanji: "neko".to_string(),
            english: "cat".to_string(),
            day: 1,
            kind,
            mastered,
            needs_review,
            review_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            last_reviewed: now,
            created_at: now,
            last_modified: None,
        }
    }

    #[test]
    fn test_sync_config_wire_format() {
        let mut config = SyncConfig::default();
        config.enabled = true;
        config.last_local_change_time = DateTime::from_timestamp_millis(5_000).unwrap();
        let mut op = PendingSyncOperation::new(SyncReason::WordChange);
        op.enqueued_at = DateTime::from_timestamp_millis(4_000).unwrap();
        config.pending_operations.push(op);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["lastLocalChangeTime"], 5_000);
        assert_eq!(json["pendingOperations"][0]["type"], "word-change");
        assert_eq!(json["lastSyncTime"], Value::Null);

        let back: SyncConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_sync_config_accepts_legacy_keys() {
        let json = serde_json::json!({
            "enabled": true,
            "googleAccessToken": "tok",
            "googleTokenExpiry": 1_700_000_000_000i64,
            "driveFileId": "file-1",
            "lastLocalChangeTime": 10,
            "pendingSyncOperations": [],
            "syncFailureCount": 2,
        });
        let config: SyncConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.remote_file_id.as_deref(), Some("file-1"));
        assert_eq!(config.failure_count, 2);
    }

    #[test]
    fn test_touch_local_change_is_monotonic() {
        let mut config = SyncConfig::default();
        let later = DateTime::from_timestamp_millis(10_000).unwrap();
        let earlier = DateTime::from_timestamp_millis(2_000).unwrap();
        config.touch_local_change(later);
        config.touch_local_change(earlier);
        assert_eq!(config.last_local_change_time, later);
    }

    #[test]
    fn test_settings_theme_is_not_part_of_synced_half() {
        let settings = AppSettings {
            theme: Theme::Light,
            synced: SyncedSettings::default(),
        };
        let full = serde_json::to_value(&settings).unwrap();
        assert_eq!(full["theme"], "light");
        assert_eq!(full["reviewMode"], "sequential");

        let synced = serde_json::to_value(&settings.synced).unwrap();
        assert!(synced.get("theme").is_none());
    }

    #[test]
    fn test_synced_settings_preserve_unknown_fields() {
        let json = serde_json::json!({
            "reviewMode": "random",
            "futureFlag": {"nested": true},
            "theme": "light"
        });
        let synced: SyncedSettings = serde_json::from_value(json).unwrap();
        assert_eq!(synced.review_mode, ReviewMode::Random);
        assert!(synced.extra.contains_key("futureFlag"));

        let clean = synced.sanitized();
        assert!(!clean.extra.contains_key("theme"));
        assert!(clean.extra.contains_key("futureFlag"));
    }

    #[test]
    fn test_session_score_legacy_word_mode_alias() {
        let json = serde_json::json!({
            "wordMode": {"correct": 3, "incorrect": 1},
            "sentenceMode": {"correct": 0, "incorrect": 0},
            "flashcardMode": {"correct": 0, "incorrect": 0}
        });
        let score: SessionScore = serde_json::from_value(json).unwrap();
        assert_eq!(score.alphabet_mode.correct, 3);
    }

    #[test]
    fn test_default_progress_is_reproducible() {
        assert_eq!(UserProgress::default(), UserProgress::default());
        assert_eq!(UserProgress::default().last_study_date.timestamp_millis(), 0);
    }

    #[test]
    fn test_progress_recount() {
        let words = vec![
            word("a", WordKind::Word, true, false),
            word("b", WordKind::Word, false, true),
            word("c", WordKind::Sentence, true, true),
        ];
        let mut progress = UserProgress::default();
        progress.recount(&words);
        assert_eq!(progress.total_words, 2);
        assert_eq!(progress.total_sentences, 1);
        assert_eq!(progress.mastered_words, 1);
        assert_eq!(progress.mastered_sentences, 1);
        assert_eq!(progress.words_needing_review, 2);
    }

    #[test]
    fn test_word_validation() {
        let mut w = word("a", WordKind::Word, false, false);
        assert!(w.validate().is_ok());
        w.day = 0;
        assert!(w.validate().is_err());
        w.day = 1;
        w.english = "  ".to_string();
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_reason_classification() {
        assert!(SyncReason::WordChange.is_local_mutation());
        assert!(!SyncReason::AppLoad.is_local_mutation());
        assert!(!SyncReason::Manual.is_local_mutation());
        assert_eq!(SyncReason::ProgressChange.to_string(), "progress-change");
    }
}
