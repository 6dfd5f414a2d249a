//! # Share Engine
//!
//! Engine context for one connected workspace: owns the client, the host
//! collaborators and every piece of mutable engine state.
//!
//! ## Owned State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ShareEngine                                   │
//! │                                                                         │
//! │  RemoteClient     DocumentHost     ShareEventEmitter                    │
//! │                                                                         │
//! │  SpeedTuner       ContentDiffEngine (asset hash cache)                  │
//! │  ChunkPlanner     ServerInfo (limits, features)                         │
//! │  share list cache + signature                                           │
//! │  active share keys (one open upload session per share)                  │
//! │  root CancelToken                                                       │
//! │                                                                         │
//! │  new() ─────────── connected ─────────── disconnect()                   │
//! │                                          cancels root token,            │
//! │                                          clears every cache             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Share Flow
//! ```text
//!  lock share key ──► export docs + probe metadata ──► fetch assets
//!        │
//!        ▼
//!  build local state ──► plan (incremental if supported, else full)
//!        │                      └── snapshot failure ──► full plan
//!        ▼
//!  empty plan on existing share ──► "unchanged", no session opened
//!        │
//!        ▼
//!  init ──► upload assets ──► complete
//!    │            │               │
//!    └──── any error after init ──┴──► best-effort upload/cancel, propagate
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use docshare_core::assets::collect_asset_refs;
use docshare_core::validation::{is_valid_id, validate_doc_id, validate_share_id};
use docshare_core::{
    AssetEntry, ChunkLimits, ChunkPlanner, ContentDiffEngine, DocDraft, LocalAsset, LocalState,
    ShareKind, SpeedTuner, SyncPlan, SyncSummary,
};

use crate::cancel::CancelToken;
use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, ShareEventEmitter};
use crate::host::DocumentHost;
use crate::protocol::{
    share_list_signature, AccessUpdate, DeleteRequest, InitAsset, ServerInfo, ShareMetadata,
    ShareRecord, UploadInitRequest,
};
use crate::scheduler::{ReconcileOutcome, Reconciler};
use crate::uploader::{ChunkUploader, UploadSession};

// =============================================================================
// Share Inputs & Outputs
// =============================================================================

/// What to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareTarget {
    Doc(String),
    Notebook(String),
}

impl ShareTarget {
    pub fn kind(&self) -> ShareKind {
        match self {
            ShareTarget::Doc(_) => ShareKind::Doc,
            ShareTarget::Notebook(_) => ShareKind::Notebook,
        }
    }

    /// Document or notebook id. Also the single-flight key.
    pub fn id(&self) -> &str {
        match self {
            ShareTarget::Doc(id) | ShareTarget::Notebook(id) => id,
        }
    }
}

/// Access settings applied when the share is created or updated.
#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub visitor_limit: Option<u32>,
    /// Skip the snapshot diff and upload everything.
    pub force_full: bool,
}

impl ShareOptions {
    fn has_access_changes(&self) -> bool {
        self.password.is_some() || self.expires_at.is_some() || self.visitor_limit.is_some()
    }
}

/// Result of a share/update pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareOutcome {
    /// `None` only if the server did not report the created share.
    pub share: Option<ShareRecord>,
    pub summary: SyncSummary,
    pub incremental: bool,
    /// Nothing differed from the server; no upload session was opened.
    pub unchanged: bool,
    pub uploaded_bytes: u64,
}

// =============================================================================
// Share Lock
// =============================================================================

/// Held for the duration of one share pass; releases the key on drop.
struct ShareLock<'a> {
    active: &'a StdMutex<HashSet<String>>,
    key: String,
}

impl Drop for ShareLock<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

#[derive(Debug, Default)]
struct ShareCache {
    records: Vec<ShareRecord>,
    signature: Option<String>,
    loaded: bool,
}

// =============================================================================
// Share Engine
// =============================================================================

pub struct ShareEngine {
    config: SyncConfig,
    client: Arc<dyn RemoteClient>,
    host: Arc<dyn DocumentHost>,
    emitter: Arc<dyn ShareEventEmitter>,
    speed: Arc<Mutex<SpeedTuner>>,
    diff: Mutex<ContentDiffEngine>,
    planner: RwLock<ChunkPlanner>,
    server: RwLock<Option<ServerInfo>>,
    shares: RwLock<ShareCache>,
    active: StdMutex<HashSet<String>>,
    root: StdMutex<CancelToken>,
}

impl ShareEngine {
    pub fn new(config: SyncConfig, client: Arc<dyn RemoteClient>, host: Arc<dyn DocumentHost>) -> Self {
        Self::with_emitter(config, client, host, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: SyncConfig,
        client: Arc<dyn RemoteClient>,
        host: Arc<dyn DocumentHost>,
        emitter: Arc<dyn ShareEventEmitter>,
    ) -> Self {
        let planner = ChunkPlanner::new(config.upload.default_chunk_limits());
        ShareEngine {
            config,
            client,
            host,
            emitter,
            speed: Arc::new(Mutex::new(SpeedTuner::new())),
            diff: Mutex::new(ContentDiffEngine::new()),
            planner: RwLock::new(planner),
            server: RwLock::new(None),
            shares: RwLock::new(ShareCache::default()),
            active: StdMutex::new(HashSet::new()),
            root: StdMutex::new(CancelToken::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A token cancelled by [`disconnect`](Self::disconnect) or by the
    /// caller.
    pub fn cancel_token(&self) -> CancelToken {
        self.root.lock().unwrap_or_else(|e| e.into_inner()).child()
    }

    /// Cancels everything in flight and drops all cached state.
    pub async fn disconnect(&self) {
        let old = {
            let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *root)
        };
        old.cancel();

        self.diff.lock().await.clear_cache();
        self.speed.lock().await.reset();
        *self.server.write().await = None;
        *self.shares.write().await = ShareCache::default();
        *self.planner.write().await = ChunkPlanner::new(self.config.upload.default_chunk_limits());
        info!("Share engine disconnected");
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server.read().await.clone()
    }

    pub async fn cached_shares(&self) -> Vec<ShareRecord> {
        self.shares.read().await.records.clone()
    }

    pub async fn avg_speed(&self) -> f64 {
        self.speed.lock().await.avg_speed()
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Checks the API key and caches the server's chunk limits and features.
    pub async fn verify(&self) -> SyncResult<ServerInfo> {
        let info = self.client.verify().await?;
        let limits = ChunkLimits::negotiate(
            info.limits.min_chunk_size,
            info.limits.max_chunk_size,
            self.config.upload.default_chunk_limits(),
        );
        self.planner.write().await.set_limits(limits);
        *self.server.write().await = Some(info.clone());

        info!(
            user = %info.user.name,
            min_chunk = limits.min,
            max_chunk = limits.max,
            incremental = info.features.incremental_share,
            "Verified share server"
        );
        Ok(info)
    }

    /// Fetches the share list and refreshes the cache.
    ///
    /// Records with malformed share ids are dropped.
    pub async fn list_shares(&self) -> SyncResult<Vec<ShareRecord>> {
        let mut records = self.client.list_shares().await?;
        records.retain(|r| {
            let ok = is_valid_id(&r.share_id);
            if !ok {
                debug!(share_id = %r.share_id, "Dropping share with malformed id");
            }
            ok
        });
        self.store_shares(records.clone()).await;
        Ok(records)
    }

    /// Replaces the cache; returns `(previous, new)` signatures.
    async fn store_shares(&self, records: Vec<ShareRecord>) -> (Option<String>, String) {
        let signature = share_list_signature(&records);
        let mut cache = self.shares.write().await;
        let previous = cache.signature.replace(signature.clone());
        cache.records = records;
        cache.loaded = true;
        (previous, signature)
    }

    async fn upsert_share(&self, record: ShareRecord) {
        let mut cache = self.shares.write().await;
        match cache.records.iter_mut().find(|r| r.share_id == record.share_id) {
            Some(existing) => *existing = record,
            None => cache.records.push(record),
        }
        cache.signature = Some(share_list_signature(&cache.records));
    }

    async fn existing_share(&self, target_id: &str) -> SyncResult<Option<ShareRecord>> {
        if !self.shares.read().await.loaded {
            self.list_shares().await?;
        }
        Ok(self
            .shares
            .read()
            .await
            .records
            .iter()
            .find(|r| r.doc_id == target_id)
            .cloned())
    }

    fn try_lock_share(&self, key: &str) -> SyncResult<ShareLock<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.to_string()) {
            return Err(SyncError::ShareBusy(key.to_string()));
        }
        Ok(ShareLock {
            active: &self.active,
            key: key.to_string(),
        })
    }

    // =========================================================================
    // Share / Update
    // =========================================================================

    /// Creates or updates the share for `target`.
    ///
    /// A second call for the same target while one is running fails with
    /// [`SyncError::ShareBusy`].
    pub async fn share(
        &self,
        target: ShareTarget,
        options: ShareOptions,
        cancel: &CancelToken,
    ) -> SyncResult<ShareOutcome> {
        let op_id = Uuid::new_v4();
        let span = info_span!(
            "share",
            op_id = %op_id,
            kind = %target.kind(),
            target = %target.id()
        );

        let result = self.share_inner(&target, &options, cancel).instrument(span).await;
        if let Err(ref e) = result {
            if !e.is_cancelled() {
                self.emitter.emit_error(&e.user_message());
            }
        }
        result
    }

    async fn share_inner(
        &self,
        target: &ShareTarget,
        options: &ShareOptions,
        cancel: &CancelToken,
    ) -> SyncResult<ShareOutcome> {
        validate_doc_id(target.id())?;
        let _lock = self.try_lock_share(target.id())?;
        cancel.check()?;

        let server = match self.server_info().await {
            Some(info) => info,
            None => self.verify().await?,
        };

        self.emitter.emit_status("Collecting documents");
        let drafts = self.collect_docs(target, cancel).await?;
        let (entries, unreadable) = self.collect_assets(&drafts, cancel).await?;
        let mut local = self.diff.lock().await.build_local_state(drafts, entries)?;
        local.retain_paths(unreadable);

        let existing = self.existing_share(target.id()).await?;
        let plan = self
            .plan(&local, existing.as_ref(), &server, options.force_full)
            .await;

        if existing.is_some() && plan.is_empty() && !options.has_access_changes() {
            info!("Share is up to date");
            self.emitter.emit_status("Share is up to date");
            return Ok(ShareOutcome {
                share: existing,
                summary: plan.summary,
                incremental: plan.incremental,
                unchanged: true,
                uploaded_bytes: 0,
            });
        }

        let title = match target {
            ShareTarget::Doc(_) => local.docs.first().map(|d| d.title.clone()).unwrap_or_default(),
            ShareTarget::Notebook(id) => self.host.notebook_title(id).await?,
        };

        let request = UploadInitRequest {
            metadata: ShareMetadata {
                share_id: existing.as_ref().map(|s| s.share_id.clone()),
                target_id: target.id().to_string(),
                title,
                docs: plan.upload_docs.clone(),
                deleted_doc_ids: plan.deleted_doc_ids.clone(),
                deleted_asset_paths: plan.deleted_asset_paths.clone(),
                incremental: plan.incremental,
                password: options.password.clone(),
                expires_at: options.expires_at,
                visitor_limit: options.visitor_limit,
            },
            assets: plan
                .upload_assets
                .iter()
                .map(|a| InitAsset {
                    path: a.path.clone(),
                    size: a.size,
                    doc_id: a.doc_id.clone(),
                })
                .collect(),
        };

        cancel.check()?;
        let upload_id = self.client.init_upload(target.kind(), &request).await?;
        info!(
            upload_id = %upload_id,
            docs = plan.upload_docs.len(),
            assets = plan.upload_assets.len(),
            bytes = plan.upload_bytes(),
            incremental = plan.incremental,
            "Upload session opened"
        );

        let session = UploadSession::new(
            upload_id.clone(),
            plan.upload_bytes(),
            plan.upload_assets.len() as u32,
            self.emitter.clone(),
        );

        let record = match self.upload_and_complete(&session, &local, &plan, cancel).await {
            Ok(record) => record,
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "Share failed, cancelling upload session");
                if let Err(cancel_err) = self.client.cancel_upload(&upload_id).await {
                    warn!(upload_id = %upload_id, error = %cancel_err, "Upload cancel failed");
                }
                return Err(e);
            }
        };

        let share = match record {
            Some(record) => {
                self.upsert_share(record.clone()).await;
                Some(record)
            }
            None => match self.list_shares().await {
                Ok(records) => records.into_iter().find(|r| r.doc_id == target.id()),
                Err(e) => {
                    debug!(error = %e, "Share list refresh after upload failed");
                    existing
                }
            },
        };

        let snapshot = session.snapshot().await;
        self.emitter.emit_status("Share published");
        info!(uploaded_bytes = snapshot.uploaded_bytes, "Share complete");

        Ok(ShareOutcome {
            share,
            summary: plan.summary,
            incremental: plan.incremental,
            unchanged: false,
            uploaded_bytes: snapshot.uploaded_bytes,
        })
    }

    async fn upload_and_complete(
        &self,
        session: &UploadSession,
        local: &LocalState,
        plan: &SyncPlan,
        cancel: &CancelToken,
    ) -> SyncResult<Option<ShareRecord>> {
        let assets: Vec<&LocalAsset> = plan
            .upload_assets
            .iter()
            .filter_map(|record| local.asset(&record.path))
            .collect();

        if !assets.is_empty() {
            self.emitter.emit_status("Uploading assets");
            let planner = *self.planner.read().await;
            let uploader = ChunkUploader::new(
                self.client.clone(),
                planner,
                self.speed.clone(),
                &self.config.upload,
            );
            uploader
                .upload_assets(session, &assets, self.config.upload.max_asset_concurrency, cancel)
                .await?;
        }

        cancel.check()?;
        self.client.complete_upload(session.upload_id()).await
    }

    /// Chooses between an incremental and a full plan.
    async fn plan(
        &self,
        local: &LocalState,
        existing: Option<&ShareRecord>,
        server: &ServerInfo,
        force_full: bool,
    ) -> SyncPlan {
        let existing = match existing {
            Some(share) => share,
            None => return self.diff.lock().await.build_full_upload_plan(local, false),
        };
        if force_full || !server.features.incremental_share {
            return self.diff.lock().await.build_full_upload_plan(local, true);
        }

        let snapshot = self.client.fetch_snapshot(&existing.share_id).await;
        let diff = self.diff.lock().await;
        match snapshot {
            Ok(snapshot) => diff.build_incremental_plan(local, &snapshot),
            Err(e) => {
                warn!(share_id = %existing.share_id, error = %e, "Incremental analysis failed, uploading everything");
                diff.build_full_upload_plan(local, true)
            }
        }
    }

    async fn collect_docs(&self, target: &ShareTarget, cancel: &CancelToken) -> SyncResult<Vec<DocDraft>> {
        let ids = match target {
            ShareTarget::Doc(id) => vec![id.clone()],
            ShareTarget::Notebook(id) => self.host.list_notebook_docs(id).await?,
        };

        let probes = self.host.metadata_probes();
        let mut drafts = Vec::with_capacity(ids.len());
        for doc_id in ids {
            cancel.check()?;
            let exported = self.host.export_doc(&doc_id).await?;
            let meta = probes.resolve(&doc_id, &exported.h_path).await;
            drafts.push(DocDraft {
                doc_id,
                title: meta.title,
                markdown: exported.markdown,
                h_path: exported.h_path,
                parent_id: meta.parent_id,
                sort_index: meta.sort_index,
                sort_order: meta.sort_order,
                icon: meta.icon,
            });
        }
        debug!(docs = drafts.len(), "Documents collected");
        Ok(drafts)
    }

    /// Fetches every asset the docs reference.
    ///
    /// Returns the fetched entries and the referenced paths that could not be
    /// read; the latter are neither uploaded nor deleted remotely.
    async fn collect_assets(
        &self,
        drafts: &[DocDraft],
        cancel: &CancelToken,
    ) -> SyncResult<(Vec<AssetEntry>, Vec<String>)> {
        let mut used = HashSet::new();
        let mut entries = Vec::new();
        let mut unreadable = Vec::new();

        for draft in drafts {
            for path in collect_asset_refs(&draft.markdown) {
                if !used.insert(path.clone()) {
                    continue;
                }
                cancel.check()?;
                match self.host.fetch_asset(&path).await {
                    Ok(fetched) => entries.push(AssetEntry {
                        path,
                        doc_id: draft.doc_id.clone(),
                        bytes: fetched.bytes,
                        revision: fetched.revision,
                    }),
                    Err(e) => {
                        warn!(asset_path = %path, error = %e, "Skipping unreadable asset");
                        unreadable.push(path);
                    }
                }
            }
        }
        debug!(assets = entries.len(), unreadable = unreadable.len(), "Assets collected");
        Ok((entries, unreadable))
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Changes password, expiry or visitor limit of a share.
    pub async fn update_access(&self, share_id: &str, update: AccessUpdate) -> SyncResult<ShareRecord> {
        if share_id.trim().is_empty() {
            return Err(SyncError::MissingShareId);
        }
        validate_share_id(share_id)?;

        let request = update.into_request(share_id.to_string());
        let record = self.client.update_access(&request).await?;
        info!(share_id, "Share access updated");
        self.upsert_share(record.clone()).await;
        Ok(record)
    }

    /// Deletes a share. `hard_delete` also removes stored assets.
    pub async fn delete_share(&self, share_id: &str, hard_delete: bool) -> SyncResult<()> {
        if share_id.trim().is_empty() {
            return Err(SyncError::MissingShareId);
        }
        validate_share_id(share_id)?;

        self.client
            .delete_share(&DeleteRequest {
                share_id: share_id.to_string(),
                hard_delete,
            })
            .await?;

        let mut cache = self.shares.write().await;
        cache.records.retain(|r| r.share_id != share_id);
        cache.signature = Some(share_list_signature(&cache.records));
        info!(share_id, hard_delete, "Share deleted");
        Ok(())
    }
}

// =============================================================================
// Background Reconciliation
// =============================================================================

#[async_trait]
impl Reconciler for ShareEngine {
    fn has_credentials(&self) -> bool {
        self.config.has_credentials()
    }

    /// Verify + list. A change is a different share-list signature than the
    /// previous cycle saw; the first observation is not a change.
    async fn reconcile(&self) -> SyncResult<ReconcileOutcome> {
        self.verify().await?;
        let records = self.client.list_shares().await?;
        let records: Vec<ShareRecord> = records.into_iter().filter(|r| is_valid_id(&r.share_id)).collect();
        let (previous, current) = self.store_shares(records).await;
        let changed = previous.is_some_and(|p| p != current);
        Ok(ReconcileOutcome { changed })
    }
}
