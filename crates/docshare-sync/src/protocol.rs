//! # Share Server Protocol
//!
//! Request and response shapes for the share server HTTP API.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Share Server Endpoints                             │
//! │                                                                         │
//! │  SESSION                                                               │
//! │  ───────                                                               │
//! │  POST verify                 {}                → ServerInfo            │
//! │  GET  shares                                   → { shares }            │
//! │                                                                         │
//! │  UPLOAD SESSION                                                        │
//! │  ──────────────                                                        │
//! │  POST shares/snapshot        { shareId }       → RemoteSnapshot        │
//! │  POST shares/doc/init        { metadata, assets } → { uploadId }       │
//! │  POST shares/notebook/init   { metadata, assets } → { uploadId }       │
//! │  POST shares/asset/chunk     multipart         → ok | missingChunks    │
//! │  POST shares/upload/complete { uploadId }      → ok                    │
//! │  POST shares/upload/cancel   { uploadId }      → ok (best effort)      │
//! │                                                                         │
//! │  MANAGEMENT                                                            │
//! │  ──────────                                                            │
//! │  POST shares/access/update   { shareId, ... }  → ShareRecord           │
//! │  POST shares/delete          { shareId, hardDelete } → ok              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Every response is wrapped in an envelope; `code != 0` is an application
//! error:
//! ```json
//! { "code": 0, "msg": "", "data": { "uploadId": "u-1" } }
//! { "code": 1, "msg": "incomplete", "data": { "missingChunks": [2, 5] } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use docshare_core::{DocRecord, ShareKind};

// =============================================================================
// Endpoint Paths
// =============================================================================

pub const PATH_VERIFY: &str = "verify";
pub const PATH_SHARES: &str = "shares";
pub const PATH_SNAPSHOT: &str = "shares/snapshot";
pub const PATH_DOC_INIT: &str = "shares/doc/init";
pub const PATH_NOTEBOOK_INIT: &str = "shares/notebook/init";
pub const PATH_ASSET_CHUNK: &str = "shares/asset/chunk";
pub const PATH_UPLOAD_COMPLETE: &str = "shares/upload/complete";
pub const PATH_UPLOAD_CANCEL: &str = "shares/upload/cancel";
pub const PATH_ACCESS_UPDATE: &str = "shares/access/update";
pub const PATH_DELETE: &str = "shares/delete";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Init endpoint for a share kind.
pub fn init_path(kind: ShareKind) -> &'static str {
    match kind {
        ShareKind::Doc => PATH_DOC_INIT,
        ShareKind::Notebook => PATH_NOTEBOOK_INIT,
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// `{code, msg, data}` wrapper around every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Error payload of a final-chunk completeness check.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MissingChunksData {
    #[serde(default)]
    missing_chunks: Option<Vec<u32>>,
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// `data.missingChunks`, if this is an error envelope carrying one.
    pub fn missing_chunks(&self) -> Option<Vec<u32>> {
        if self.is_ok() {
            return None;
        }
        serde_json::from_value::<MissingChunksData>(self.data.clone())
            .ok()
            .and_then(|d| d.missing_chunks)
    }
}

// =============================================================================
// Verify
// =============================================================================

/// Account the API key belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Chunk bounds advertised by the server. Missing values fall back to the
/// configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLimits {
    #[serde(default)]
    pub min_chunk_size: Option<u64>,
    #[serde(default)]
    pub max_chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    #[serde(default)]
    pub incremental_share: bool,
}

/// Response of `verify`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub user: ServerUser,
    #[serde(default)]
    pub limits: ServerLimits,
    #[serde(default)]
    pub features: ServerFeatures,
}

// =============================================================================
// Share Records
// =============================================================================

/// One published share as the server reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub share_id: String,
    /// Shared document or notebook id.
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub kind: ShareKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub has_password: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visitor_limit: Option<u32>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareListResponse {
    #[serde(default)]
    pub shares: Vec<ShareRecord>,
}

/// The fields of a [`ShareRecord`] that describe the share itself. View
/// counters and server timestamps are left out.
#[derive(Serialize)]
struct ShareState<'a> {
    share_id: &'a str,
    doc_id: &'a str,
    kind: &'a ShareKind,
    title: &'a str,
    url: &'a str,
    has_password: bool,
    expires_at: Option<i64>,
    visitor_limit: Option<u32>,
}

impl<'a> From<&'a ShareRecord> for ShareState<'a> {
    fn from(s: &'a ShareRecord) -> Self {
        ShareState {
            share_id: &s.share_id,
            doc_id: &s.doc_id,
            kind: &s.kind,
            title: &s.title,
            url: &s.url,
            has_password: s.has_password,
            expires_at: s.expires_at.map(|t| t.timestamp_millis()),
            visitor_limit: s.visitor_limit,
        }
    }
}

/// Order-independent digest of a share list.
///
/// Two lists with the same shares produce the same signature regardless of
/// the order the server returned them in. Visitor activity alone does not
/// change it.
pub fn share_list_signature(shares: &[ShareRecord]) -> String {
    let mut encoded: Vec<String> = shares
        .iter()
        .map(|s| serde_json::to_string(&ShareState::from(s)).unwrap_or_else(|_| s.share_id.clone()))
        .collect();
    encoded.sort();

    let mut hasher = Sha256::new();
    for line in &encoded {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub share_id: String,
}

// =============================================================================
// Upload Session
// =============================================================================

/// Share-level metadata sent with upload init.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMetadata {
    /// Existing share being updated; absent on first share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    /// Root document or notebook id.
    pub target_id: String,
    pub title: String,
    /// Docs to write. Only changed docs when `incremental` is set.
    pub docs: Vec<DocRecord>,
    #[serde(default)]
    pub deleted_doc_ids: Vec<String>,
    #[serde(default)]
    pub deleted_asset_paths: Vec<String>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_limit: Option<u32>,
}

/// Asset announced at init; every one of these must be uploaded before
/// complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAsset {
    pub path: String,
    pub size: u64,
    pub doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitRequest {
    pub metadata: ShareMetadata,
    pub assets: Vec<InitAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInitResponse {
    #[serde(default)]
    pub upload_id: Option<String>,
}

/// One chunk request. Sent as multipart form fields plus a binary `chunk`.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub asset_path: String,
    pub asset_doc_id: Option<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub total_size: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIdRequest {
    pub upload_id: String,
}

// =============================================================================
// Access & Delete
// =============================================================================

/// Three-state update of one access field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccessSetting<T> {
    /// Leave the server value alone.
    #[default]
    Keep,
    Set(T),
    /// Remove the restriction.
    Clear,
}

impl<T> AccessSetting<T> {
    fn split(self) -> (Option<T>, bool) {
        match self {
            AccessSetting::Keep => (None, false),
            AccessSetting::Set(v) => (Some(v), false),
            AccessSetting::Clear => (None, true),
        }
    }
}

/// Changes to a share's access restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessUpdate {
    pub password: AccessSetting<String>,
    pub expires_at: AccessSetting<DateTime<Utc>>,
    pub visitor_limit: AccessSetting<u32>,
}

impl AccessUpdate {
    pub fn is_noop(&self) -> bool {
        self.password == AccessSetting::Keep
            && self.expires_at == AccessSetting::Keep
            && self.visitor_limit == AccessSetting::Keep
    }

    pub fn into_request(self, share_id: String) -> AccessUpdateRequest {
        let (password, clear_password) = self.password.split();
        let (expires_at, clear_expires) = self.expires_at.split();
        let (visitor_limit, clear_visitor_limit) = self.visitor_limit.split();
        AccessUpdateRequest {
            share_id,
            password,
            clear_password,
            expires_at,
            clear_expires,
            visitor_limit,
            clear_visitor_limit,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessUpdateRequest {
    pub share_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_expires: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_visitor_limit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub share_id: String,
    pub hard_delete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_envelope_missing_chunks() {
        let env: Envelope = serde_json::from_value(json!({
            "code": 1,
            "msg": "incomplete",
            "data": { "missingChunks": [2, 5] }
        }))
        .unwrap();
        assert!(!env.is_ok());
        assert_eq!(env.missing_chunks(), Some(vec![2, 5]));

        let plain: Envelope = serde_json::from_value(json!({ "code": 3, "msg": "nope" })).unwrap();
        assert_eq!(plain.missing_chunks(), None);

        let ok: Envelope = serde_json::from_value(json!({ "code": 0, "data": {} })).unwrap();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_verify_defaults() {
        let info: ServerInfo = serde_json::from_value(json!({
            "user": { "id": "u1", "name": "ann" },
            "limits": { "minChunkSize": 524288 }
        }))
        .unwrap();
        assert_eq!(info.limits.min_chunk_size, Some(524_288));
        assert_eq!(info.limits.max_chunk_size, None);
        assert!(!info.features.incremental_share);
    }

    #[test]
    fn test_access_request_shape() {
        let expires = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let update = AccessUpdate {
            password: AccessSetting::Clear,
            expires_at: AccessSetting::Set(expires),
            visitor_limit: AccessSetting::Keep,
        };
        assert!(!update.is_noop());

        let body = serde_json::to_value(update.into_request("s1".into())).unwrap();
        assert_eq!(
            body,
            json!({
                "shareId": "s1",
                "clearPassword": true,
                "expiresAt": 1_700_000_000_000i64
            })
        );
    }

    #[test]
    fn test_share_record_lenient() {
        let record: ShareRecord = serde_json::from_value(json!({
            "shareId": "s1",
            "kind": "notebook",
            "expiresAt": null
        }))
        .unwrap();
        assert_eq!(record.kind, ShareKind::Notebook);
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn test_signature_ignores_order() {
        let a = ShareRecord { share_id: "a".into(), ..Default::default() };
        let b = ShareRecord { share_id: "b".into(), title: "B".into(), ..Default::default() };
        assert_eq!(
            share_list_signature(&[a.clone(), b.clone()]),
            share_list_signature(&[b.clone(), a.clone()])
        );

        let b2 = ShareRecord { title: "B2".into(), ..b };
        assert_ne!(share_list_signature(&[a.clone()]), share_list_signature(&[a, b2]));
    }

    #[test]
    fn test_signature_ignores_visitor_activity() {
        let quiet = ShareRecord {
            share_id: "a".into(),
            doc_id: "nb-1".into(),
            view_count: 3,
            ..Default::default()
        };
        let busy = ShareRecord {
            view_count: 250,
            updated_at: Some(Utc::now()),
            ..quiet.clone()
        };
        assert_eq!(share_list_signature(&[quiet.clone()]), share_list_signature(&[busy]));

        let limited = ShareRecord {
            visitor_limit: Some(10),
            ..quiet.clone()
        };
        assert_ne!(share_list_signature(&[quiet.clone()]), share_list_signature(&[limited]));

        let protected = ShareRecord {
            has_password: true,
            ..quiet.clone()
        };
        assert_ne!(share_list_signature(&[quiet]), share_list_signature(&[protected]));
    }
}
