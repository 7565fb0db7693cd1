//! Object storage backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::grant::{PresignError, Presigner};
use crate::keys::ObjectKey;
use crate::retry::RetryableError;

/// Lifetime of the URL the gateway signs for its own relayed PUTs.
const RELAY_URL_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage answered with status {0}")]
    Status(u16),

    #[error("storage rejected the request: {0}")]
    Rejected(#[from] PresignError),

    #[error("storage request could not be built: {0}")]
    Request(String),
}

impl RetryableError for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Status(status) => *status >= 500 || *status == 429,
            Self::Rejected(_) | Self::Request(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Writes are idempotent: the same key always gets the same bytes.
    async fn put_object(
        &self,
        key: &ObjectKey,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

// ── S3-COMPATIBLE ───────────────────────────────────────────────

/// Talks to an S3-compatible service through URLs it presigns itself, so
/// relayed uploads are held to the same signature rules as client ones.
pub struct S3Backend {
    client: reqwest::Client,
    presigner: Arc<Presigner>,
}

impl S3Backend {
    pub fn new(presigner: Arc<Presigner>, request_timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client, presigner })
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn put_object(
        &self,
        key: &ObjectKey,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), StorageError> {
        let url = self
            .presigner
            .presign_put(key, content_type, body.len() as u64, RELAY_URL_TTL, Utc::now())
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

// ── IN-MEMORY ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Bytes,
}

/// Process-local backend for development and tests. It also plays the
/// storage side of a presigned upload.
pub struct MemoryBackend {
    presigner: Arc<Presigner>,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new(presigner: Arc<Presigner>) -> Self {
        Self {
            presigner,
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Accept a client PUT against a presigned URL, as a real bucket would.
    pub async fn put_presigned(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let verified =
            self.presigner
                .verify_put("PUT", url, content_type, body.len() as u64, now)?;

        self.objects.write().await.insert(
            verified.key.clone(),
            StoredObject {
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(verified.key)
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put_object(
        &self,
        key: &ObjectKey,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), StorageError> {
        self.objects.write().await.insert(
            key.as_str().to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::StorageCredentials;
    use reqwest::Url;
    use uuid::Uuid;
    use zeroize::Zeroizing;

    fn presigner() -> Arc<Presigner> {
        Arc::new(Presigner::new(StorageCredentials {
            endpoint: Url::parse("http://storage.localhost").unwrap(),
            bucket: "docs".into(),
            region: "us-east-1".into(),
            access_key_id: "local".into(),
            secret_access_key: Zeroizing::new("secret".into()),
        }))
    }

    fn key() -> ObjectKey {
        crate::keys::derive_object_key(Uuid::new_v4(), "a.txt", Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn memory_backend_stores_direct_puts() {
        let backend = MemoryBackend::new(presigner());
        let key = key();
        backend
            .put_object(&key, "text/plain", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        let stored = backend.get(key.as_str()).await.unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"hi"));
        assert_eq!(stored.content_type, "text/plain");
    }

    #[tokio::test]
    async fn memory_backend_enforces_presigned_constraints() {
        let signer = presigner();
        let backend = MemoryBackend::new(signer.clone());
        let key = key();
        let now = Utc::now();
        let url = signer
            .presign_put(&key, "text/plain", 2, Duration::from_secs(60), now)
            .unwrap();

        let err = backend
            .put_presigned(url.as_str(), "text/plain", Bytes::from_static(b"toolong"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected(PresignError::SignatureMismatch)));
        assert_eq!(backend.len().await, 0);

        let stored = backend
            .put_presigned(url.as_str(), "text/plain", Bytes::from_static(b"ok"), now)
            .await
            .unwrap();
        assert_eq!(stored, key.as_str());
    }

    #[test]
    fn retry_classification() {
        assert!(StorageError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StorageError::Status(503).is_retryable());
        assert!(!StorageError::Status(403).is_retryable());
        assert!(!StorageError::Rejected(PresignError::Expired).is_retryable());
    }
}
