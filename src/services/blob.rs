//! Permanent ciphertext storage
//!
//! Switch payloads normally live in the external blob store; the DMS
//! service falls back to the key-value store when an upload fails, so a
//! storage outage never loses a message.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::{Result, VigilError};

/// Upload and retrieval of opaque base64 ciphertexts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a ciphertext, returning its permanent handle.
    async fn upload(&self, content_b64: &str) -> Result<String>;

    /// Fetch a ciphertext by the handle `upload` returned.
    async fn fetch(&self, handle: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FetchReply {
    content: String,
}

/// HTTP store against `BLOB_UPLOAD_ENDPOINT`.
///
/// `POST {endpoint}` with `{content}` answers `{id}`;
/// `GET {endpoint}/{id}` answers `{content}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpBlobStore {
    pub fn new(endpoint: Option<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, content_b64: &str) -> Result<String> {
        let Some(endpoint) = &self.endpoint else {
            return Err(VigilError::Upstream(
                "BLOB_UPLOAD_ENDPOINT is not configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(endpoint)
            .json(&json!({ "content": content_b64 }))
            .send()
            .await
            .map_err(|e| VigilError::Upstream(format!("Blob upload failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VigilError::Upstream(format!(
                "Blob upload returned {}",
                response.status()
            )));
        }

        let reply: UploadReply = response
            .json()
            .await
            .map_err(|e| VigilError::Upstream(format!("Blob upload reply malformed: {e}")))?;
        debug!(id = %reply.id, "Ciphertext uploaded");
        Ok(reply.id)
    }

    async fn fetch(&self, handle: &str) -> Result<String> {
        let Some(endpoint) = &self.endpoint else {
            return Err(VigilError::Upstream(
                "BLOB_UPLOAD_ENDPOINT is not configured".to_string(),
            ));
        };

        let url = format!("{}/{}", endpoint.trim_end_matches('/'), handle);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VigilError::Upstream(format!("Blob fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VigilError::Upstream(format!(
                "Blob fetch returned {}",
                response.status()
            )));
        }

        let reply: FetchReply = response
            .json()
            .await
            .map_err(|e| VigilError::Upstream(format!("Blob fetch reply malformed: {e}")))?;
        Ok(reply.content)
    }
}

/// In-memory store for tests. `fail_uploads` simulates an outage to drive
/// the local-fallback path.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
    fail_uploads: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            fail_uploads: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            fail_uploads: true,
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, content_b64: &str) -> Result<String> {
        if self.fail_uploads {
            return Err(VigilError::Upstream("Blob store unavailable".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.blobs
            .lock()
            .map_err(|_| VigilError::Internal("blob store poisoned".to_string()))?
            .insert(id.clone(), content_b64.to_string());
        Ok(id)
    }

    async fn fetch(&self, handle: &str) -> Result<String> {
        self.blobs
            .lock()
            .map_err(|_| VigilError::Internal("blob store poisoned".to_string()))?
            .get(handle)
            .cloned()
            .ok_or_else(|| VigilError::Upstream(format!("Blob {handle} not found")))
    }
}
