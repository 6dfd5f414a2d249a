//! # Remote Client
//!
//! The boundary between the engine and the share server.
//!
//! [`RemoteClient`] is what the engine talks to; [`HttpRemoteClient`] is the
//! production implementation on top of `reqwest`. Tests drive the engine
//! through an in-memory implementation instead.
//!
//! ## Request Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request ──► X-Api-Key header ──► send (per-request timeout)            │
//! │                                       │                                 │
//! │              transport error ◄────────┤──► Network / Timeout            │
//! │              HTTP status ≠ 2xx ◄──────┤──► HttpStatus { status, body }  │
//! │                                       ▼                                 │
//! │                           { code, msg, data }                           │
//! │                                       │                                 │
//! │              code ≠ 0 ◄───────────────┤──► Api { code, msg }            │
//! │                 └─ data.missingChunks ──► MissingChunks (chunk only)    │
//! │                                       ▼                                 │
//! │                               decode `data`                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use docshare_core::{RemoteSnapshot, ShareKind};

use crate::config::ServerSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    init_path, AccessUpdateRequest, ChunkUpload, DeleteRequest, Envelope, ServerInfo,
    ShareListResponse, ShareRecord, SnapshotRequest, UploadIdRequest, UploadInitRequest,
    UploadInitResponse, API_KEY_HEADER, PATH_ACCESS_UPDATE, PATH_ASSET_CHUNK, PATH_DELETE,
    PATH_SHARES, PATH_SNAPSHOT, PATH_UPLOAD_CANCEL, PATH_UPLOAD_COMPLETE, PATH_VERIFY,
};

// =============================================================================
// Remote Client Trait
// =============================================================================

/// Authenticated calls against the share server.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Checks the API key and returns account, limits and features.
    async fn verify(&self) -> SyncResult<ServerInfo>;

    async fn list_shares(&self) -> SyncResult<Vec<ShareRecord>>;

    /// Server's last-synced hash state for a share.
    async fn fetch_snapshot(&self, share_id: &str) -> SyncResult<RemoteSnapshot>;

    /// Opens an upload session and returns its id.
    async fn init_upload(&self, kind: ShareKind, request: &UploadInitRequest) -> SyncResult<String>;

    /// Sends one chunk. A completeness failure on the final chunk comes back
    /// as [`SyncError::MissingChunks`].
    async fn upload_chunk(&self, chunk: ChunkUpload) -> SyncResult<()>;

    /// Finalises the session. Servers may return the resulting share.
    async fn complete_upload(&self, upload_id: &str) -> SyncResult<Option<ShareRecord>>;

    /// Rolls back the session.
    async fn cancel_upload(&self, upload_id: &str) -> SyncResult<()>;

    async fn update_access(&self, request: &AccessUpdateRequest) -> SyncResult<ShareRecord>;

    async fn delete_share(&self, request: &DeleteRequest) -> SyncResult<()>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// `reqwest`-backed client.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl HttpRemoteClient {
    /// Builds a client from server settings. Fails with
    /// [`SyncError::MissingCredentials`] if the URL or key is unset.
    pub fn new(settings: &ServerSettings) -> SyncResult<Self> {
        let (raw_url, api_key) = match (settings.url.as_deref(), settings.api_key.as_deref()) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                (url.trim(), key.trim())
            }
            _ => return Err(SyncError::MissingCredentials),
        };

        let mut base = Url::parse(raw_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(HttpRemoteClient {
            http,
            base,
            api_key: api_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path)?)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SyncResult<Envelope> {
        let response = request.header(API_KEY_HEADER, &self.api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> SyncResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "POST");
        let url = self.endpoint(path)?;
        let envelope = self.send(self.http.post(url).json(body)).await?;
        decode(envelope)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        debug!(path, "GET");
        let url = self.endpoint(path)?;
        let envelope = self.send(self.http.get(url)).await?;
        decode(envelope)
    }
}

fn decode<T: DeserializeOwned>(envelope: Envelope) -> SyncResult<T> {
    if !envelope.is_ok() {
        return Err(SyncError::Api {
            code: envelope.code,
            msg: envelope.msg,
        });
    }
    Ok(serde_json::from_value(envelope.data)?)
}

fn chunk_form(chunk: ChunkUpload) -> SyncResult<Form> {
    let file_name = chunk
        .asset_path
        .rsplit('/')
        .next()
        .unwrap_or("chunk")
        .to_string();
    let part = Part::bytes(chunk.data)
        .file_name(file_name)
        .mime_str("application/octet-stream")
        .map_err(|e| SyncError::Internal(format!("Failed to build multipart: {}", e)))?;

    let mut form = Form::new()
        .text("uploadId", chunk.upload_id)
        .text("assetPath", chunk.asset_path)
        .text("chunkIndex", chunk.chunk_index.to_string())
        .text("totalChunks", chunk.total_chunks.to_string())
        .text("totalSize", chunk.total_size.to_string());
    if let Some(doc_id) = chunk.asset_doc_id {
        form = form.text("assetDocId", doc_id);
    }
    Ok(form.part("chunk", part))
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn verify(&self) -> SyncResult<ServerInfo> {
        self.post(PATH_VERIFY, &serde_json::json!({})).await
    }

    async fn list_shares(&self) -> SyncResult<Vec<ShareRecord>> {
        let response: ShareListResponse = self.get(PATH_SHARES).await?;
        Ok(response.shares)
    }

    async fn fetch_snapshot(&self, share_id: &str) -> SyncResult<RemoteSnapshot> {
        let request = SnapshotRequest {
            share_id: share_id.to_string(),
        };
        self.post(PATH_SNAPSHOT, &request).await
    }

    async fn init_upload(&self, kind: ShareKind, request: &UploadInitRequest) -> SyncResult<String> {
        let response: UploadInitResponse = self.post(init_path(kind), request).await?;
        match response.upload_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(SyncError::MissingUploadId),
        }
    }

    async fn upload_chunk(&self, chunk: ChunkUpload) -> SyncResult<()> {
        let asset_path = chunk.asset_path.clone();
        let chunk_index = chunk.chunk_index;
        debug!(asset_path = %asset_path, chunk_index, "POST chunk");

        let url = self.endpoint(PATH_ASSET_CHUNK)?;
        let envelope = self
            .send(self.http.post(url).multipart(chunk_form(chunk)?))
            .await?;

        if let Some(indices) = envelope.missing_chunks() {
            return Err(SyncError::MissingChunks { asset_path, indices });
        }
        if !envelope.is_ok() {
            return Err(SyncError::Api {
                code: envelope.code,
                msg: envelope.msg,
            });
        }
        Ok(())
    }

    async fn complete_upload(&self, upload_id: &str) -> SyncResult<Option<ShareRecord>> {
        let request = UploadIdRequest {
            upload_id: upload_id.to_string(),
        };
        let data: serde_json::Value = self.post(PATH_UPLOAD_COMPLETE, &request).await?;
        // servers that answer with a bare ack carry no record
        Ok(serde_json::from_value(data).ok())
    }

    async fn cancel_upload(&self, upload_id: &str) -> SyncResult<()> {
        let request = UploadIdRequest {
            upload_id: upload_id.to_string(),
        };
        let _: serde_json::Value = self.post(PATH_UPLOAD_CANCEL, &request).await?;
        Ok(())
    }

    async fn update_access(&self, request: &AccessUpdateRequest) -> SyncResult<ShareRecord> {
        self.post(PATH_ACCESS_UPDATE, request).await
    }

    async fn delete_share(&self, request: &DeleteRequest) -> SyncResult<()> {
        let _: serde_json::Value = self.post(PATH_DELETE, request).await?;
        Ok(())
    }
}
