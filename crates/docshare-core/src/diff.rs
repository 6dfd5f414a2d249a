//! # Content Diff Engine
//!
//! Hashes local documents/assets and reconciles them against the server's
//! snapshot to produce the minimal upload plan.
//!
//! ## Planning Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Diff Engine Flow                                 │
//! │                                                                         │
//! │  DocDraft[] + AssetEntry[]                                              │
//! │        │                                                                │
//! │        ▼  build_local_state()                                           │
//! │  LocalState { DocRecord[] (content+meta hash), LocalAsset[] (hash) }    │
//! │        │                                                                │
//! │        ├──────────────── server supports incremental + prior share ──┐  │
//! │        │                                                             │  │
//! │        ▼  build_full_upload_plan()          build_incremental_plan() ▼  │
//! │  every doc + asset                    normalise snapshot, compare     │
//! │  no deletions                         hashes, collect deletions       │
//! │        │                                                             │  │
//! │        └──────────────────────────► SyncPlan ◄───────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Change Rules
//! - Doc changed: no remote doc, remote hashes empty (never synced),
//!   content hash mismatch, or meta hash mismatch.
//! - Asset changed: no remote asset, hash mismatch, or different owner doc.
//! - Deleted: remote entries with no local counterpart. An asset that a
//!   local doc still references but the host could not read is retained.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::assets::sanitize_asset_path;
use crate::error::CoreError;
use crate::hash::{content_hash, meta_hash, normalize_hash, sha256_hex};
use crate::types::{
    AssetEntry, AssetRecord, DocDraft, DocRecord, RemoteAsset, RemoteDoc, RemoteSnapshot,
    SyncPlan, SyncSummary,
};
use crate::validation::{is_valid_id, validate_doc_id};

// =============================================================================
// Local State
// =============================================================================

/// A hashed asset together with the bytes the uploader will send.
#[derive(Debug, Clone)]
pub struct LocalAsset {
    pub record: AssetRecord,
    pub bytes: Arc<[u8]>,
}

/// Hashed view of everything the host exported for one pass.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    pub docs: Vec<DocRecord>,
    pub assets: Vec<LocalAsset>,
    /// Referenced asset paths whose bytes were unavailable this pass. Their
    /// remote copies are neither re-uploaded nor deleted.
    pub retained_paths: HashSet<String>,
}

impl LocalState {
    /// Marks referenced but unreadable asset paths, sanitised the same way
    /// as hashed ones.
    pub fn retain_paths<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        for path in paths {
            match sanitize_asset_path(&path) {
                Ok(path) => {
                    self.retained_paths.insert(path);
                }
                Err(e) => debug!(path = %path, error = %e, "Ignoring unusable retained path"),
            }
        }
    }

    /// Looks up an asset's bytes by sanitised path.
    pub fn asset(&self, path: &str) -> Option<&LocalAsset> {
        self.assets.iter().find(|a| a.record.path == path)
    }

    pub fn total_asset_bytes(&self) -> u64 {
        self.assets.iter().map(|a| a.record.size).sum()
    }
}

// =============================================================================
// Asset Hash Cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
    size: u64,
    revision: String,
}

/// Remembers asset digests across passes, keyed by path, size and a host
/// revision token. Entries without a revision are never cached.
#[derive(Debug, Default)]
pub struct AssetHashCache {
    entries: HashMap<CacheKey, String>,
}

impl AssetHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn hash(&mut self, path: &str, bytes: &[u8], revision: Option<&str>) -> String {
        let Some(revision) = revision else {
            return sha256_hex(bytes);
        };
        let key = CacheKey {
            path: path.to_string(),
            size: bytes.len() as u64,
            revision: revision.to_string(),
        };
        if let Some(hash) = self.entries.get(&key) {
            return hash.clone();
        }

        // one live entry per path
        self.entries.retain(|k, _| k.path != path);
        let hash = sha256_hex(bytes);
        self.entries.insert(key, hash.clone());
        hash
    }
}

// =============================================================================
// Content Diff Engine
// =============================================================================

/// Builds local state and upload plans. Owns the asset hash cache.
#[derive(Debug, Default)]
pub struct ContentDiffEngine {
    cache: AssetHashCache,
}

impl ContentDiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &AssetHashCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Hashes every document and every unique asset path.
    ///
    /// Duplicate doc ids and duplicate sanitised asset paths keep their first
    /// occurrence. Unusable asset paths are skipped; a malformed doc id fails
    /// the whole pass.
    pub fn build_local_state(
        &mut self,
        docs: Vec<DocDraft>,
        assets: Vec<AssetEntry>,
    ) -> Result<LocalState, CoreError> {
        let mut seen_docs = HashSet::new();
        let mut records = Vec::with_capacity(docs.len());

        for draft in docs {
            validate_doc_id(&draft.doc_id)?;
            if !seen_docs.insert(draft.doc_id.clone()) {
                debug!(doc_id = %draft.doc_id, "Skipping duplicate document");
                continue;
            }
            let meta = meta_hash(&draft)?;
            let content = content_hash(&draft.markdown);
            records.push(DocRecord {
                doc_id: draft.doc_id,
                title: draft.title,
                markdown: draft.markdown,
                h_path: draft.h_path,
                parent_id: draft.parent_id,
                sort_index: draft.sort_index,
                sort_order: draft.sort_order,
                icon: draft.icon,
                content_hash: content,
                meta_hash: meta,
            });
        }

        let mut used_paths = HashSet::new();
        let mut local_assets = Vec::with_capacity(assets.len());

        for entry in assets {
            let path = match sanitize_asset_path(&entry.path) {
                Ok(path) => path,
                Err(e) => {
                    debug!(path = %entry.path, error = %e, "Skipping unusable asset path");
                    continue;
                }
            };
            if !used_paths.insert(path.clone()) {
                continue;
            }
            let hash = self
                .cache
                .hash(&path, &entry.bytes, entry.revision.as_deref());
            local_assets.push(LocalAsset {
                record: AssetRecord {
                    path,
                    doc_id: entry.doc_id,
                    size: entry.bytes.len() as u64,
                    hash,
                },
                bytes: entry.bytes,
            });
        }

        Ok(LocalState {
            docs: records,
            assets: local_assets,
            retained_paths: HashSet::new(),
        })
    }

    /// Diffs local state against the server snapshot.
    pub fn build_incremental_plan(&self, local: &LocalState, remote: &RemoteSnapshot) -> SyncPlan {
        let remote_docs = normalize_remote_docs(&remote.docs);
        let remote_assets = normalize_remote_assets(&remote.assets);

        let mut summary = SyncSummary {
            base_docs: remote_docs.len() as u32,
            base_assets: remote_assets.len() as u32,
            ..Default::default()
        };

        let remote_doc_index: HashMap<&str, &RemoteDoc> =
            remote_docs.iter().map(|d| (d.doc_id.as_str(), d)).collect();
        let remote_asset_index: HashMap<&str, &RemoteAsset> =
            remote_assets.iter().map(|a| (a.path.as_str(), a)).collect();

        let mut upload_docs = Vec::new();
        for doc in &local.docs {
            match remote_doc_index.get(doc.doc_id.as_str()) {
                None => {
                    summary.added_docs += 1;
                    upload_docs.push(doc.clone());
                }
                Some(remote) if doc_changed(doc, remote) => {
                    summary.updated_docs += 1;
                    upload_docs.push(doc.clone());
                }
                Some(_) => {}
            }
        }

        let mut upload_assets = Vec::new();
        for asset in &local.assets {
            let record = &asset.record;
            match remote_asset_index.get(record.path.as_str()) {
                None => {
                    summary.added_assets += 1;
                    upload_assets.push(record.clone());
                }
                Some(remote) if remote.hash != record.hash || remote.doc_id != record.doc_id => {
                    summary.updated_assets += 1;
                    upload_assets.push(record.clone());
                }
                Some(_) => {}
            }
        }

        let local_doc_ids: HashSet<&str> = local.docs.iter().map(|d| d.doc_id.as_str()).collect();
        let local_paths: HashSet<&str> =
            local.assets.iter().map(|a| a.record.path.as_str()).collect();

        let deleted_doc_ids: Vec<String> = remote_docs
            .iter()
            .filter(|d| !local_doc_ids.contains(d.doc_id.as_str()))
            .map(|d| d.doc_id.clone())
            .collect();
        let deleted_asset_paths: Vec<String> = remote_assets
            .iter()
            .filter(|a| !local_paths.contains(a.path.as_str()))
            .filter(|a| !local.retained_paths.contains(&a.path))
            .map(|a| a.path.clone())
            .collect();

        summary.deleted_docs = deleted_doc_ids.len() as u32;
        summary.deleted_assets = deleted_asset_paths.len() as u32;

        debug!(
            upload_docs = upload_docs.len(),
            upload_assets = upload_assets.len(),
            deleted_docs = deleted_doc_ids.len(),
            deleted_assets = deleted_asset_paths.len(),
            "Built incremental plan"
        );

        SyncPlan {
            upload_docs,
            upload_assets,
            deleted_doc_ids,
            deleted_asset_paths,
            summary,
            incremental: true,
        }
    }

    /// Plans a full upload of every local doc and asset.
    ///
    /// `assume_existing` is true when a share already exists but cannot be
    /// diffed; entries then count as updated instead of added.
    pub fn build_full_upload_plan(&self, local: &LocalState, assume_existing: bool) -> SyncPlan {
        let docs = local.docs.len() as u32;
        let assets = local.assets.len() as u32;

        let summary = if assume_existing {
            SyncSummary {
                updated_docs: docs,
                updated_assets: assets,
                ..Default::default()
            }
        } else {
            SyncSummary {
                added_docs: docs,
                added_assets: assets,
                ..Default::default()
            }
        };

        SyncPlan {
            upload_docs: local.docs.clone(),
            upload_assets: local.assets.iter().map(|a| a.record.clone()).collect(),
            deleted_doc_ids: Vec::new(),
            deleted_asset_paths: Vec::new(),
            summary,
            incremental: false,
        }
    }
}

fn doc_changed(local: &DocRecord, remote: &RemoteDoc) -> bool {
    remote.content_hash.is_empty()
        || remote.meta_hash.is_empty()
        || remote.content_hash != local.content_hash
        || remote.meta_hash != local.meta_hash
}

/// Drops entries with malformed ids, lowercases hashes and keeps the first
/// entry per doc id.
fn normalize_remote_docs(docs: &[RemoteDoc]) -> Vec<RemoteDoc> {
    let mut seen = HashSet::new();
    docs.iter()
        .filter(|d| is_valid_id(d.doc_id.trim()))
        .filter(|d| seen.insert(d.doc_id.trim().to_string()))
        .map(|d| RemoteDoc {
            doc_id: d.doc_id.trim().to_string(),
            content_hash: normalize_hash(&d.content_hash),
            meta_hash: normalize_hash(&d.meta_hash),
            sort_order: d.sort_order,
        })
        .collect()
}

/// Sanitises paths the same way local paths are, lowercases hashes and
/// blanks owner ids that fail validation.
fn normalize_remote_assets(assets: &[RemoteAsset]) -> Vec<RemoteAsset> {
    let mut seen = HashSet::new();
    assets
        .iter()
        .filter_map(|a| {
            let path = sanitize_asset_path(&a.path).ok()?;
            if !seen.insert(path.clone()) {
                return None;
            }
            let doc_id = a.doc_id.trim();
            Some(RemoteAsset {
                path,
                doc_id: if is_valid_id(doc_id) {
                    doc_id.to_string()
                } else {
                    String::new()
                },
                hash: normalize_hash(&a.hash),
            })
        })
        .collect()
}
