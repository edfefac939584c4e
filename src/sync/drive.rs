//! Google Drive v3 backend
//!
//! Stores the snapshot as a single JSON file created by this app (the
//! `drive.file` scope only exposes files the app created itself).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::credentials::{CredentialProvider, TokenRevoker};
use super::remote::{FileId, RemoteBlobStore, RemoteMetadata};
use super::snapshot::AppDataSnapshot;
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
/// OAuth scope the consent flow must request
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const METADATA_FIELDS: &str = "id,name,modifiedTime,size,mimeType";

/// Endpoints and naming for [`GoogleDriveStore`]
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub api_base: String,
    pub upload_base: String,
    pub file_name: String,
    pub timeout: Duration,
}

impl DriveConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            file_name: settings.remote_file_name.clone(),
            timeout: settings.http_timeout,
        }
    }

    /// Point both API bases at another host (used against mock servers)
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = format!("{base}/drive/v3");
        self.upload_base = format!("{base}/upload/drive/v3");
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    modified_time: Option<DateTime<Utc>>,
    /// Drive reports sizes as decimal strings
    size: Option<String>,
}

impl DriveFile {
    fn into_metadata(self) -> Result<RemoteMetadata> {
        let modified_at = self.modified_time.ok_or_else(|| {
            SyncError::InvalidSnapshot(format!("drive file {} has no modifiedTime", self.id))
        })?;
        let size = self
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(RemoteMetadata {
            id: self.id,
            modified_at,
            size,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// [`RemoteBlobStore`] over the Drive v3 REST API
pub struct GoogleDriveStore {
    client: Client,
    config: DriveConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl GoogleDriveStore {
    pub fn new(config: DriveConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn token(&self) -> Result<String> {
        self.credentials.access_token()
    }

    fn name_query(&self) -> String {
        let escaped = self.config.file_name.replace('\\', "\\\\").replace('\'', "\\'");
        format!("name='{escaped}' and trashed=false")
    }

    async fn upload_content(
        &self,
        file_id: &str,
        snapshot: &AppDataSnapshot,
    ) -> Result<RemoteMetadata> {
        let url = format!("{}/files/{}", self.config.upload_base, file_id);
        let response = self
            .client
            .patch(&url)
            .bearer_auth(self.token()?)
            .query(&[("uploadType", "media"), ("fields", METADATA_FIELDS)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(snapshot.to_vec()?)
            .send()
            .await?;
        let file: DriveFile = check(response, "write").await?.json().await?;
        file.into_metadata()
    }
}

/// Map a Drive response status onto the error taxonomy
async fn check(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(operation, status = status.as_u16(), body = %body, "Drive request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED => SyncError::Auth(format!("{operation}: access token rejected")),
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited(format!("{operation}: HTTP 429")),
        StatusCode::FORBIDDEN
            if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") =>
        {
            SyncError::RateLimited(format!("{operation}: quota rate limit"))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(format!("{operation}: file not found")),
        s if s.is_server_error() => SyncError::Network(format!("{operation}: HTTP {}", s.as_u16())),
        s => SyncError::Remote {
            status: s.as_u16(),
            message: body,
        },
    })
}

#[async_trait]
impl RemoteBlobStore for GoogleDriveStore {
    async fn locate(&self) -> Result<Option<FileId>> {
        let url = format!("{}/files", self.config.api_base);
        let query = self.name_query();
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id,name,modifiedTime)"),
            ])
            .send()
            .await?;
        let list: FileList = check(response, "locate").await?.json().await?;
        let found = list.files.into_iter().next().map(|f| f.id);
        tracing::debug!(file_id = ?found, "Located remote file");
        Ok(found)
    }

    async fn create(&self, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        let url = format!("{}/files", self.config.api_base);
        let body = serde_json::json!({
            "name": self.config.file_name,
            "mimeType": "application/json",
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token()?)
            .query(&[("fields", "id")])
            .json(&body)
            .send()
            .await?;
        let file: DriveFile = check(response, "create").await?.json().await?;
        tracing::info!(file_id = %file.id, name = %self.config.file_name, "Created remote file");
        self.upload_content(&file.id, snapshot).await
    }

    async fn read(&self, file_id: &str) -> Result<AppDataSnapshot> {
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let bytes = check(response, "read").await?.bytes().await?;
        AppDataSnapshot::from_slice(&bytes)
    }

    async fn write(&self, file_id: &str, snapshot: &AppDataSnapshot) -> Result<RemoteMetadata> {
        self.upload_content(file_id, snapshot).await
    }

    async fn metadata(&self, file_id: &str) -> Result<RemoteMetadata> {
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .query(&[("fields", METADATA_FIELDS)])
            .send()
            .await?;
        let file: DriveFile = check(response, "metadata").await?.json().await?;
        file.into_metadata()
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        check(response, "delete").await?;
        tracing::info!(file_id, "Deleted remote file");
        Ok(())
    }
}

/// Revokes tokens at Google's OAuth endpoint
pub struct GoogleTokenRevoker {
    client: Client,
    endpoint: String,
}

impl GoogleTokenRevoker {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: GOOGLE_REVOKE_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TokenRevoker for GoogleTokenRevoker {
    async fn revoke(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("token", access_token)])
            .send()
            .await?;
        check(response, "revoke").await?;
        tracing::info!("Access token revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::credentials::{StaticTokenFlow, TokenCredentials};

    fn store(file_name: &str) -> GoogleDriveStore {
        let mut settings = SyncSettings::default();
        settings.remote_file_name = file_name.to_string();
        let creds = Arc::new(TokenCredentials::new(
            Arc::new(StaticTokenFlow::new("t", 3600)),
            settings.token_safety_margin,
        ));
        GoogleDriveStore::new(DriveConfig::from_settings(&settings), creds).unwrap()
    }

    #[test]
    fn test_name_query_escapes_quotes() {
        assert_eq!(
            store("it's.json").name_query(),
            "name='it\\'s.json' and trashed=false"
        );
    }

    #[test]
    fn test_base_url_override() {
        let config = DriveConfig::from_settings(&SyncSettings::default())
            .with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(config.upload_base, "http://127.0.0.1:9000/upload/drive/v3");
    }

    #[test]
    fn test_drive_file_metadata_parsing() {
        let file: DriveFile = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "name": "x.json",
            "modifiedTime": "2024-05-01T10:00:00.000Z",
            "size": "2048",
            "mimeType": "application/json"
        }))
        .unwrap();
        let meta = file.into_metadata().unwrap();
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.size, 2048);
        assert_eq!(meta.modified_at.timestamp_millis(), 1_714_557_600_000);
    }

    #[tokio::test]
    async fn test_calls_without_token_fail_with_auth() {
        let store = store("data.json");
        assert!(matches!(store.locate().await, Err(SyncError::Auth(_))));
        assert!(matches!(store.metadata("x").await, Err(SyncError::Auth(_))));
    }
}
