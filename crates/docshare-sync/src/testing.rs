//! In-memory [`RemoteClient`] that records every call, for engine and
//! uploader tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use docshare_core::{RemoteSnapshot, ShareKind};

use crate::client::RemoteClient;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    AccessUpdateRequest, ChunkUpload, DeleteRequest, ServerInfo, ShareRecord, UploadInitRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Verify,
    ListShares,
    Snapshot(String),
    Init {
        kind: ShareKind,
        share_id: Option<String>,
        doc_ids: Vec<String>,
        asset_paths: Vec<String>,
        deleted_doc_ids: Vec<String>,
        incremental: bool,
    },
    Chunk { asset_path: String, index: u32 },
    Complete(String),
    Cancel(String),
    Access(String),
    Delete { share_id: String, hard: bool },
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    info: ServerInfo,
    shares: Vec<ShareRecord>,
    snapshots: HashMap<String, RemoteSnapshot>,
    missing: HashMap<(String, u32), VecDeque<Vec<u32>>>,
    transient: HashMap<(String, u32), u32>,
    stored: HashMap<String, BTreeMap<u32, Vec<u8>>>,
    fail_verify: bool,
    fail_snapshot: bool,
    fail_complete: bool,
    uploads: u32,
}

#[derive(Default)]
pub struct MockRemote {
    state: Mutex<State>,
    init_gate: Mutex<Option<Arc<Notify>>>,
    snapshot_gate: Mutex<Option<Arc<Notify>>>,
    chunk_gate: Mutex<Option<Arc<Notify>>>,
}

/// Parks on a one-shot gate if one is installed.
async fn pass(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().unwrap().take();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_info(&self, info: ServerInfo) {
        self.state().info = info;
    }

    pub fn set_shares(&self, shares: Vec<ShareRecord>) {
        self.state().shares = shares;
    }

    pub fn set_snapshot(&self, share_id: &str, snapshot: RemoteSnapshot) {
        self.state().snapshots.insert(share_id.to_string(), snapshot);
    }

    /// Next send of `(path, index)` answers with `missingChunks`.
    pub fn script_missing(&self, path: &str, index: u32, missing: Vec<u32>) {
        self.state()
            .missing
            .entry((path.to_string(), index))
            .or_default()
            .push_back(missing);
    }

    /// Next `times` sends of `(path, index)` fail with a network error.
    pub fn script_transient(&self, path: &str, index: u32, times: u32) {
        self.state().transient.insert((path.to_string(), index), times);
    }

    pub fn fail_verify(&self, fail: bool) {
        self.state().fail_verify = fail;
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.state().fail_snapshot = fail;
    }

    pub fn fail_complete(&self, fail: bool) {
        self.state().fail_complete = fail;
    }

    /// Blocks `init_upload` until the returned notify fires.
    pub fn gate_init(&self) -> Arc<Notify> {
        install(&self.init_gate)
    }

    /// Blocks the next `fetch_snapshot`, after recording the call, until the
    /// returned notify fires.
    pub fn gate_snapshot(&self) -> Arc<Notify> {
        install(&self.snapshot_gate)
    }

    /// Blocks the next `upload_chunk`, after recording the call and before
    /// storing the data, until the returned notify fires.
    pub fn gate_chunks(&self) -> Arc<Notify> {
        install(&self.chunk_gate)
    }

    /// Concatenation of every stored chunk of `path`, in index order.
    pub fn assembled(&self, path: &str) -> Vec<u8> {
        self.state()
            .stored
            .get(path)
            .map(|chunks| chunks.values().flatten().copied().collect())
            .unwrap_or_default()
    }
}

fn install(slot: &Mutex<Option<Arc<Notify>>>) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *slot.lock().unwrap() = Some(gate.clone());
    gate
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn verify(&self) -> SyncResult<ServerInfo> {
        let mut state = self.state();
        state.calls.push(Call::Verify);
        if state.fail_verify {
            return Err(SyncError::Network("unreachable".into()));
        }
        Ok(state.info.clone())
    }

    async fn list_shares(&self) -> SyncResult<Vec<ShareRecord>> {
        let mut state = self.state();
        state.calls.push(Call::ListShares);
        Ok(state.shares.clone())
    }

    async fn fetch_snapshot(&self, share_id: &str) -> SyncResult<RemoteSnapshot> {
        self.state().calls.push(Call::Snapshot(share_id.to_string()));
        pass(&self.snapshot_gate).await;

        let state = self.state();
        if state.fail_snapshot {
            return Err(SyncError::Api {
                code: 500,
                msg: "snapshot unavailable".into(),
            });
        }
        Ok(state.snapshots.get(share_id).cloned().unwrap_or_default())
    }

    async fn init_upload(&self, kind: ShareKind, request: &UploadInitRequest) -> SyncResult<String> {
        pass(&self.init_gate).await;

        let mut state = self.state();
        state.calls.push(Call::Init {
            kind,
            share_id: request.metadata.share_id.clone(),
            doc_ids: request.metadata.docs.iter().map(|d| d.doc_id.clone()).collect(),
            asset_paths: request.assets.iter().map(|a| a.path.clone()).collect(),
            deleted_doc_ids: request.metadata.deleted_doc_ids.clone(),
            incremental: request.metadata.incremental,
        });
        state.uploads += 1;
        Ok(format!("upload-{}", state.uploads))
    }

    async fn upload_chunk(&self, chunk: ChunkUpload) -> SyncResult<()> {
        self.state().calls.push(Call::Chunk {
            asset_path: chunk.asset_path.clone(),
            index: chunk.chunk_index,
        });
        pass(&self.chunk_gate).await;

        let mut state = self.state();
        let key = (chunk.asset_path.clone(), chunk.chunk_index);

        if let Some(left) = state.transient.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(SyncError::Network("connection reset".into()));
            }
        }

        state
            .stored
            .entry(chunk.asset_path.clone())
            .or_default()
            .insert(chunk.chunk_index, chunk.data);

        if let Some(indices) = state.missing.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(SyncError::MissingChunks {
                asset_path: chunk.asset_path,
                indices,
            });
        }
        Ok(())
    }

    async fn complete_upload(&self, upload_id: &str) -> SyncResult<Option<ShareRecord>> {
        let mut state = self.state();
        state.calls.push(Call::Complete(upload_id.to_string()));
        if state.fail_complete {
            return Err(SyncError::Api {
                code: 2,
                msg: "assembly failed".into(),
            });
        }
        Ok(None)
    }

    async fn cancel_upload(&self, upload_id: &str) -> SyncResult<()> {
        self.state().calls.push(Call::Cancel(upload_id.to_string()));
        Ok(())
    }

    async fn update_access(&self, request: &AccessUpdateRequest) -> SyncResult<ShareRecord> {
        let mut state = self.state();
        state.calls.push(Call::Access(request.share_id.clone()));
        let mut record = state
            .shares
            .iter()
            .find(|s| s.share_id == request.share_id)
            .cloned()
            .unwrap_or_else(|| ShareRecord {
                share_id: request.share_id.clone(),
                ..Default::default()
            });
        if request.password.is_some() {
            record.has_password = true;
        }
        if request.clear_password {
            record.has_password = false;
        }
        Ok(record)
    }

    async fn delete_share(&self, request: &DeleteRequest) -> SyncResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Delete {
            share_id: request.share_id.clone(),
            hard: request.hard_delete,
        });
        state.shares.retain(|s| s.share_id != request.share_id);
        Ok(())
    }
}
