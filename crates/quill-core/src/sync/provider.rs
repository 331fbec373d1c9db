//! Remote backup providers
//!
//! The engine only consumes two operations from a provider: "fetch the
//! latest backup" and "overwrite it with mine". No provider-specific
//! semantics beyond that are assumed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{RemoteBackup, Snapshot};

/// Trait for the remote backup interface the engine consumes
#[allow(async_fn_in_trait)]
pub trait BackupProvider {
    /// Fetch the latest backup, or `None` if no backup exists yet
    async fn fetch_latest(&self) -> Result<Option<RemoteBackup>>;

    /// Overwrite the remote backup with the given snapshot
    async fn push(&self, snapshot: &Snapshot, content_timestamp: i64) -> Result<()>;
}

/// Wire shape shared by the file and HTTP providers
#[derive(Debug, Serialize, Deserialize)]
struct BackupEnvelope {
    payload: String,
    captured_at: i64,
    content_timestamp: i64,
    backup_timestamp: i64,
}

impl From<BackupEnvelope> for RemoteBackup {
    fn from(envelope: BackupEnvelope) -> Self {
        Self {
            content: Snapshot {
                payload: envelope.payload,
                captured_at: envelope.captured_at,
            },
            content_timestamp: envelope.content_timestamp,
            backup_timestamp: envelope.backup_timestamp,
        }
    }
}

/// Backup provider writing to a single file, e.g. inside a folder that a
/// third-party service mirrors across devices
pub struct FileBackupProvider {
    path: PathBuf,
}

impl FileBackupProvider {
    /// Create a provider storing its backup at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BackupProvider for FileBackupProvider {
    async fn fetch_latest(&self) -> Result<Option<RemoteBackup>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(Error::Fetch(error.to_string())),
        };

        let envelope: BackupEnvelope =
            serde_json::from_str(&raw).map_err(|error| Error::Fetch(error.to_string()))?;
        Ok(Some(envelope.into()))
    }

    async fn push(&self, snapshot: &Snapshot, content_timestamp: i64) -> Result<()> {
        let envelope = BackupEnvelope {
            payload: snapshot.payload.clone(),
            captured_at: snapshot.captured_at,
            content_timestamp,
            backup_timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let raw = serde_json::to_string_pretty(&envelope)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| Error::Fetch(error.to_string()))?;
        }
        std::fs::write(&self.path, raw).map_err(|error| Error::Fetch(error.to_string()))?;
        Ok(())
    }
}

/// Backup provider talking to a hosted backup endpoint over HTTPS
#[derive(Clone)]
pub struct HttpBackupProvider {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackupProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBackupProvider")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpBackupProvider {
    /// Create a provider against the given base endpoint
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            auth_token,
            client: reqwest::Client::builder()
                .build()
                .map_err(|error| Error::Fetch(error.to_string()))?,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl BackupProvider for HttpBackupProvider {
    async fn fetch_latest(&self) -> Result<Option<RemoteBackup>> {
        let url = format!("{}/v1/backup/latest", self.endpoint);
        let response = self
            .request(self.client.get(&url).header("Accept", "application/json"))
            .send()
            .await
            .map_err(|error| Error::Fetch(error.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(parse_api_error(status, &body)));
        }

        let envelope = response
            .json::<BackupEnvelope>()
            .await
            .map_err(|error| Error::Fetch(error.to_string()))?;
        Ok(Some(envelope.into()))
    }

    async fn push(&self, snapshot: &Snapshot, content_timestamp: i64) -> Result<()> {
        let url = format!("{}/v1/backup", self.endpoint);
        let envelope = BackupEnvelope {
            payload: snapshot.payload.clone(),
            captured_at: snapshot.captured_at,
            content_timestamp,
            backup_timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let response = self
            .request(self.client.put(&url).json(&envelope))
            .send()
            .await
            .map_err(|error| Error::Fetch(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(parse_api_error(status, &body)));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "backup endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "backup endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider used by monitor and service tests

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::{BackupProvider, Error, RemoteBackup, Result, Snapshot};

    #[derive(Default)]
    pub struct MemoryBackupProvider {
        pub stored: Mutex<Option<RemoteBackup>>,
        pub fail: AtomicBool,
    }

    impl MemoryBackupProvider {
        pub fn with_backup(backup: RemoteBackup) -> Self {
            Self {
                stored: Mutex::new(Some(backup)),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl BackupProvider for MemoryBackupProvider {
        async fn fetch_latest(&self) -> Result<Option<RemoteBackup>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Fetch("simulated outage".to_string()));
            }
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn push(&self, snapshot: &Snapshot, content_timestamp: i64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Fetch("simulated outage".to_string()));
            }
            *self.stored.lock().unwrap() = Some(RemoteBackup {
                content: snapshot.clone(),
                content_timestamp,
                backup_timestamp: chrono::Utc::now().timestamp_millis(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn http_provider_debug_redacts_token() {
        let provider =
            HttpBackupProvider::new("https://backup.example.com", Some("secret".to_string()))
                .unwrap();
        let debug = format!("{provider:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_provider_roundtrip() {
        let tmp = tempdir().unwrap();
        let provider = FileBackupProvider::new(tmp.path().join("backup.json"));

        assert!(provider.fetch_latest().await.unwrap().is_none());

        let snapshot = Snapshot::new("{\"version\":1}");
        provider.push(&snapshot, 42).await.unwrap();

        let fetched = provider.fetch_latest().await.unwrap().unwrap();
        assert_eq!(fetched.content.payload, snapshot.payload);
        assert_eq!(fetched.content_timestamp, 42);
        assert!(fetched.backup_timestamp >= 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_provider_reports_garbage_as_fetch_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("backup.json");
        std::fs::write(&path, "not json").unwrap();

        let provider = FileBackupProvider::new(path);
        let error = provider.fetch_latest().await.unwrap_err();
        assert!(matches!(error, Error::Fetch(_)));
    }
}
