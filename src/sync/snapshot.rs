//! The document exchanged with the remote store, and the local export format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::storage::AppStore;
use crate::types::{SyncedSettings, UserProgress, Word};

/// Schema version written into every snapshot and export
pub const SCHEMA_VERSION: &str = "1.0";

/// The synchronized application data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub words: Vec<Word>,
    pub progress: UserProgress,
    pub settings: SyncedSettings,
}

impl SyncPayload {
    /// Latest modification time found inside the payload
    pub fn latest_change(&self) -> Option<DateTime<Utc>> {
        let words = self.words.iter().map(Word::touched_at);
        let settings = self
            .settings
            .last_modified
            .and_then(DateTime::from_timestamp_millis);
        words
            .chain(std::iter::once(self.progress.last_study_date))
            .chain(settings)
            .max()
    }

    fn validate(&self) -> Result<()> {
        for word in &self.words {
            word.validate().map_err(SyncError::InvalidSnapshot)?;
        }
        Ok(())
    }
}

/// Remote document: `{schemaVersion, appVersion, lastModified, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDataSnapshot {
    #[serde(alias = "version")]
    pub schema_version: String,
    pub app_version: String,
    /// Epoch milliseconds on the wire
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    pub data: SyncPayload,
}

impl AppDataSnapshot {
    /// Wrap a payload; `last_modified` is the newest of `floor` and every entity timestamp
    pub fn new(data: SyncPayload, app_version: impl Into<String>, floor: DateTime<Utc>) -> Self {
        let last_modified = data.latest_change().map_or(floor, |t| t.max(floor));
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            app_version: app_version.into(),
            last_modified,
            data,
        }
    }

    /// Build a fresh snapshot from current local state
    pub fn capture(
        store: &AppStore,
        app_version: &str,
        last_local_change: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self::new(store.sync_payload()?, app_version, last_local_change))
    }

    /// Parse and validate a downloaded document
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.schema_version.starts_with("1.") {
            return Err(SyncError::InvalidSnapshot(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }
        self.data.validate()
    }
}

/// Local backup file: `{version, exportDate, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub data: SyncPayload,
}

impl ExportData {
    pub fn new(data: SyncPayload) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            export_date: Utc::now(),
            data,
        }
    }

    /// Parse a backup file, rejecting unknown versions and malformed words
    pub fn parse(json: &str) -> Result<Self> {
        let export: Self = serde_json::from_str(json)
            .map_err(|e| SyncError::InvalidInput(format!("invalid export file: {e}")))?;
        if export.version != SCHEMA_VERSION {
            return Err(SyncError::InvalidInput(format!(
                "unsupported version: {}. Expected {SCHEMA_VERSION}",
                export.version
            )));
        }
        for word in &export.data.words {
            word.validate().map_err(SyncError::InvalidInput)?;
        }
        Ok(export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WordKind;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn payload(word_time: DateTime<Utc>) -> SyncPayload {
        let mut progress = UserProgress::default();
        progress.last_study_date = at(0);
        SyncPayload {
            words: vec![Word {
                id: "w1".into(),
                japanese: "水".into(),
                romanji: "mizu".into(),
                english: "water".into(),
                day: 2,
                kind: WordKind::Word,
                mastered: false,
                needs_review: false,
                review_count: 0,
                correct_count: 0,
                incorrect_count: 0,
                last_reviewed: word_time,
                created_at: word_time,
                last_modified: None,
            }],
            progress,
            settings: SyncedSettings::default(),
        }
    }

    #[test]
    fn test_last_modified_is_max_of_entities_and_floor() {
        let snap = AppDataSnapshot::new(payload(at(9_000)), "1.0.0", at(5_000));
        assert_eq!(snap.last_modified, at(9_000));

        let snap = AppDataSnapshot::new(payload(at(9_000)), "1.0.0", at(20_000));
        assert_eq!(snap.last_modified, at(20_000));
    }

    #[test]
    fn test_wire_format() {
        let snap = AppDataSnapshot::new(payload(at(1_000)), "0.4.0", at(1_000));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["schemaVersion"], "1.0");
        assert_eq!(json["appVersion"], "0.4.0");
        assert_eq!(json["lastModified"], 1_000);
        assert_eq!(json["data"]["words"][0]["type"], "word");
        assert!(json["data"]["settings"].get("theme").is_none());
    }

    #[test]
    fn test_from_slice_accepts_legacy_version_key() {
        let snap = AppDataSnapshot::new(payload(at(1_000)), "0.4.0", at(1_000));
        let mut json = serde_json::to_value(&snap).unwrap();
        let obj = json.as_object_mut().unwrap();
        let version = obj.remove("schemaVersion").unwrap();
        obj.insert("version".into(), version);

        let parsed = AppDataSnapshot::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(parsed, snap);
    }

    #[test]
    fn test_from_slice_rejects_bad_documents() {
        let err = AppDataSnapshot::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, SyncError::InvalidSnapshot(_)));

        let mut snap = AppDataSnapshot::new(payload(at(1_000)), "0.4.0", at(1_000));
        snap.schema_version = "2.0".into();
        let err = AppDataSnapshot::from_slice(&snap.to_vec().unwrap()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_export_parse_checks_version_and_words() {
        let export = ExportData::new(payload(Utc::now() - Duration::days(1)));
        let json = serde_json::to_string(&export).unwrap();
        assert_eq!(ExportData::parse(&json).unwrap(), export);

        let mut bad = export.clone();
        bad.version = "0.9".into();
        let err = ExportData::parse(&serde_json::to_string(&bad).unwrap()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));

        let mut bad = export;
        bad.data.words[0].romanji.clear();
        assert!(ExportData::parse(&serde_json::to_string(&bad).unwrap()).is_err());

        assert!(ExportData::parse("{").is_err());
    }
}
