//! # Domain Types
//!
//! Data model shared by the diff engine, the uploader and the wire protocol.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  LOCAL (one share/update pass)        REMOTE (server's last state)      │
//! │  ┌─────────────────┐                  ┌─────────────────┐               │
//! │  │   DocRecord     │ ── diffed vs ──► │   RemoteDoc     │               │
//! │  │  content_hash   │                  │  content_hash   │               │
//! │  │  meta_hash      │                  │  meta_hash      │               │
//! │  └─────────────────┘                  └─────────────────┘               │
//! │  ┌─────────────────┐                  ┌─────────────────┐               │
//! │  │  AssetRecord    │ ── diffed vs ──► │  RemoteAsset    │               │
//! │  │  path, hash     │                  │  path, hash     │               │
//! │  └─────────────────┘                  └─────────────────┘               │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │           ┌─────────────────┐         ┌─────────────────┐               │
//! │           │    SyncPlan     │ ──────► │   ChunkTask     │ (per asset)   │
//! │           │ uploads+deletes │         │ index, [start,  │               │
//! │           └─────────────────┘         │  end)           │               │
//! │                                       └─────────────────┘               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here lives for exactly one share/update operation and is
//! discarded afterwards.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Share Kind
// =============================================================================

/// What a share publishes: a single document or a whole notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ShareKind {
    #[default]
    Doc,
    Notebook,
}

impl std::fmt::Display for ShareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareKind::Doc => write!(f, "doc"),
            ShareKind::Notebook => write!(f, "notebook"),
        }
    }
}

// =============================================================================
// Documents
// =============================================================================

/// A document as exported by the host, before hashing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocDraft {
    pub doc_id: String,
    pub title: String,
    pub markdown: String,
    pub h_path: String,
    /// Empty for top-level documents.
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub sort_index: f64,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub icon: String,
}

/// Immutable snapshot of one document for a single share/update pass.
///
/// `content_hash` covers the markdown body only; `meta_hash` covers the
/// placement and presentation fields, so a rename or a move is detected even
/// when the body is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DocRecord {
    pub doc_id: String,
    pub title: String,
    pub markdown: String,
    pub h_path: String,
    pub parent_id: String,
    pub sort_index: f64,
    pub sort_order: i64,
    pub icon: String,
    pub content_hash: String,
    pub meta_hash: String,
}

// =============================================================================
// Assets
// =============================================================================

/// Raw asset input: a referenced path plus the bytes the host returned.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    /// Path as referenced by the document (sanitised before use).
    pub path: String,
    /// Owning document.
    pub doc_id: String,
    pub bytes: Arc<[u8]>,
    /// Opaque host token (e.g. mtime) that lets the hash cache skip rehashing.
    pub revision: Option<String>,
}

/// Hashed asset metadata. `path` is sanitised and unique within the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AssetRecord {
    pub path: String,
    pub doc_id: String,
    pub size: u64,
    pub hash: String,
}

// =============================================================================
// Remote Snapshot
// =============================================================================

/// Server-side hash state of one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RemoteDoc {
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub meta_hash: String,
    #[serde(default)]
    pub sort_order: i64,
}

/// Server-side hash state of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RemoteAsset {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub hash: String,
}

/// The server's last-known state for one share; the diff baseline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub docs: Vec<RemoteDoc>,
    #[serde(default)]
    pub assets: Vec<RemoteAsset>,
}

// =============================================================================
// Sync Plan
// =============================================================================

/// Per-kind counts describing a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncSummary {
    pub base_docs: u32,
    pub added_docs: u32,
    pub updated_docs: u32,
    pub deleted_docs: u32,
    pub base_assets: u32,
    pub added_assets: u32,
    pub updated_assets: u32,
    pub deleted_assets: u32,
}

/// The minimal set of uploads and deletions for one share/update pass.
///
/// Every entry in `upload_docs`/`upload_assets` differs from its remote
/// counterpart by content or metadata hash, or has no remote counterpart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SyncPlan {
    pub upload_docs: Vec<DocRecord>,
    pub upload_assets: Vec<AssetRecord>,
    pub deleted_doc_ids: Vec<String>,
    pub deleted_asset_paths: Vec<String>,
    pub summary: SyncSummary,
    /// True when the plan was diffed against a remote snapshot.
    pub incremental: bool,
}

impl SyncPlan {
    /// Returns true if applying this plan would not change the server.
    pub fn is_empty(&self) -> bool {
        self.upload_docs.is_empty()
            && self.upload_assets.is_empty()
            && self.deleted_doc_ids.is_empty()
            && self.deleted_asset_paths.is_empty()
    }

    /// Total bytes of asset payload this plan will transfer.
    pub fn upload_bytes(&self) -> u64 {
        self.upload_assets.iter().map(|a| a.size).sum()
    }
}

// =============================================================================
// Chunk Task
// =============================================================================

/// One contiguous byte range `[start, end)` of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChunkTask {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkTask {
    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}
