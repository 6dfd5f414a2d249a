//! # Chunk Uploader
//!
//! Uploads one asset as a sequence of chunks, with missing-chunk recovery.
//!
//! ## Transfer Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  asset (N bytes) ──► chunk size C, total T = ceil(N / C)                │
//! │                                                                         │
//! │  1. chunks 0 .. T-2   TaskPool(chunk_concurrency), each via RetryPolicy │
//! │                                                                         │
//! │  2. chunk T-1         sent alone, strictly last                         │
//! │        │                                                                │
//! │        ├── ok ─────────────────────────────────────────► asset done     │
//! │        │                                                                │
//! │        └── MissingChunks([i, j, ...])                                   │
//! │               │   (never handed to the backoff loop)                    │
//! │               ▼                                                         │
//! │  3. recovery round: re-send only i, j, ... (not T-1)                    │
//! │        TaskPool(min(chunk_concurrency, count))                          │
//! │        any response reporting missing chunks ──► next round             │
//! │        none ──────────────────────────────────────────► asset done     │
//! │                                                                         │
//! │     at most `missing_chunk_retry_limit` rounds, then the error surfaces │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunk size and total are fixed when the asset starts and never change
//! mid-transfer. Every successful chunk feeds the [`SpeedTuner`] and the
//! session's progress; chunks re-sent during recovery are not counted twice.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use docshare_core::planner::{chunk_task, total_chunks};
use docshare_core::{ChunkPlanner, LocalAsset, SpeedTuner, UploadProgress, UploadProgressSnapshot};

use crate::cancel::CancelToken;
use crate::client::RemoteClient;
use crate::config::UploadSettings;
use crate::error::{SyncError, SyncResult};
use crate::events::ShareEventEmitter;
use crate::protocol::ChunkUpload;
use crate::retry::RetryPolicy;
use crate::task_pool::TaskPool;

// =============================================================================
// Upload Session
// =============================================================================

/// One open server-side upload session and its progress accounting.
pub struct UploadSession {
    upload_id: String,
    progress: Mutex<UploadProgress>,
    emitter: Arc<dyn ShareEventEmitter>,
}

impl UploadSession {
    pub fn new(
        upload_id: String,
        total_bytes: u64,
        total_assets: u32,
        emitter: Arc<dyn ShareEventEmitter>,
    ) -> Self {
        UploadSession {
            upload_id,
            progress: Mutex::new(UploadProgress::new(total_bytes, total_assets)),
            emitter,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub async fn snapshot(&self) -> UploadProgressSnapshot {
        self.progress.lock().await.snapshot()
    }

    async fn record_chunk(&self, asset_path: &str, index: u32, bytes: u64) {
        let snapshot = {
            let mut progress = self.progress.lock().await;
            if !progress.record_chunk(asset_path, index, bytes) {
                return;
            }
            progress.snapshot()
        };
        self.emitter.emit_progress(&snapshot);
    }

    async fn complete_asset(&self, asset_path: &str) {
        let snapshot = {
            let mut progress = self.progress.lock().await;
            progress.complete_asset(asset_path);
            progress.snapshot()
        };
        self.emitter.emit_progress(&snapshot);
    }
}

// =============================================================================
// Upload Report
// =============================================================================

/// What happened while uploading one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUploadReport {
    pub path: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Recovery rounds needed (0 when the final chunk was accepted at once).
    pub recovery_rounds: u32,
    /// Every chunk index re-sent during recovery, in send order per round.
    pub recovered_chunks: Vec<u32>,
}

/// Outcome of a single chunk request.
enum ChunkOutcome {
    Stored,
    /// Stored, but the server's completeness check found these missing.
    Incomplete(Vec<u32>),
}

/// Fixed geometry of one asset transfer.
struct Transfer<'a> {
    asset: &'a LocalAsset,
    chunk_size: u64,
    total_chunks: u32,
}

// =============================================================================
// Chunk Uploader
// =============================================================================

/// Uploads assets chunk by chunk.
#[derive(Clone)]
pub struct ChunkUploader {
    client: Arc<dyn RemoteClient>,
    planner: ChunkPlanner,
    retry: RetryPolicy,
    speed: Arc<Mutex<SpeedTuner>>,
    max_chunk_concurrency: usize,
    missing_chunk_retry_limit: u32,
}

impl ChunkUploader {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        planner: ChunkPlanner,
        speed: Arc<Mutex<SpeedTuner>>,
        settings: &UploadSettings,
    ) -> Self {
        ChunkUploader {
            client,
            planner,
            retry: RetryPolicy::from_settings(settings),
            speed,
            max_chunk_concurrency: settings.max_chunk_concurrency.max(1),
            missing_chunk_retry_limit: settings.missing_chunk_retry_limit,
        }
    }

    /// Replaces the default retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Uploads several assets, `asset_concurrency` of them at a time as chosen
    /// by the planner.
    pub async fn upload_assets(
        &self,
        session: &UploadSession,
        assets: &[&LocalAsset],
        max_asset_concurrency: usize,
        cancel: &CancelToken,
    ) -> SyncResult<Vec<AssetUploadReport>> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let sizes: Vec<u64> = assets.iter().map(|a| a.record.size).collect();
        let total_bytes: u64 = sizes.iter().sum();
        let avg_speed = self.speed.lock().await.avg_speed();
        let concurrency = self.planner.asset_concurrency(
            total_bytes,
            assets.len(),
            max_asset_concurrency,
            &sizes,
            avg_speed,
        );

        info!(
            upload_id = %session.upload_id(),
            assets = assets.len(),
            total_bytes,
            concurrency,
            "Uploading assets"
        );

        TaskPool::new(concurrency)
            .run_indexed(assets.len(), cancel, |i| self.upload_asset(session, assets[i], cancel))
            .await
    }

    /// Uploads one asset. Chunk geometry is decided here, once.
    pub async fn upload_asset(
        &self,
        session: &UploadSession,
        asset: &LocalAsset,
        cancel: &CancelToken,
    ) -> SyncResult<AssetUploadReport> {
        cancel.check()?;

        let size = asset.bytes.len() as u64;
        let avg_speed = self.speed.lock().await.avg_speed();
        let chunk_size = self.planner.chunk_size(size, avg_speed);
        let total = total_chunks(size, chunk_size);
        let concurrency =
            self.planner
                .chunk_concurrency(size, chunk_size, self.max_chunk_concurrency, avg_speed);
        let transfer = Transfer {
            asset,
            chunk_size,
            total_chunks: total,
        };
        let path = asset.record.path.as_str();

        debug!(
            asset_path = %path,
            size,
            chunk_size,
            total_chunks = total,
            concurrency,
            "Uploading asset"
        );

        // every chunk but the last, in parallel
        let leading = (total - 1) as usize;
        let outcomes = TaskPool::new(concurrency)
            .run_indexed(leading, cancel, |i| {
                self.send_chunk(session, &transfer, i as u32, cancel)
            })
            .await?;
        if let Some(indices) = reported_missing(outcomes) {
            debug!(asset_path = %path, ?indices, "Completeness reported before final chunk");
        }

        // final chunk strictly last
        let final_index = total - 1;
        let mut outcome = self.send_chunk(session, &transfer, final_index, cancel).await?;

        let mut report = AssetUploadReport {
            path: path.to_string(),
            chunk_size,
            total_chunks: total,
            recovery_rounds: 0,
            recovered_chunks: Vec::new(),
        };

        while let ChunkOutcome::Incomplete(reported) = outcome {
            if report.recovery_rounds >= self.missing_chunk_retry_limit {
                warn!(
                    asset_path = %path,
                    rounds = report.recovery_rounds,
                    missing = ?reported,
                    "Missing chunks persist after recovery"
                );
                return Err(SyncError::MissingChunks {
                    asset_path: path.to_string(),
                    indices: reported,
                });
            }

            let targets: Vec<u32> = reported
                .iter()
                .copied()
                .filter(|i| *i < final_index)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if targets.is_empty() {
                return Err(SyncError::MissingChunks {
                    asset_path: path.to_string(),
                    indices: reported,
                });
            }

            report.recovery_rounds += 1;
            warn!(
                asset_path = %path,
                round = report.recovery_rounds,
                missing = ?targets,
                "Re-sending missing chunks"
            );

            let pool = TaskPool::new(concurrency.min(targets.len()));
            let outcomes = pool
                .run_indexed(targets.len(), cancel, |k| {
                    self.send_chunk(session, &transfer, targets[k], cancel)
                })
                .await?;
            report.recovered_chunks.extend(&targets);

            outcome = match reported_missing(outcomes) {
                Some(indices) => ChunkOutcome::Incomplete(indices),
                None => ChunkOutcome::Stored,
            };
        }

        cancel.check()?;
        session.complete_asset(path).await;
        debug!(asset_path = %path, rounds = report.recovery_rounds, "Asset uploaded");
        Ok(report)
    }

    /// Sends one chunk through the retry policy.
    async fn send_chunk(
        &self,
        session: &UploadSession,
        transfer: &Transfer<'_>,
        index: u32,
        cancel: &CancelToken,
    ) -> SyncResult<ChunkOutcome> {
        cancel.check()?;

        let asset = transfer.asset;
        let size = asset.bytes.len() as u64;
        let range = chunk_task(size, transfer.chunk_size, index)?;
        let data = &asset.bytes[range.start as usize..range.end as usize];
        let path = asset.record.path.as_str();
        let client = &*self.client;

        let result = self
            .retry
            .run(
                cancel,
                |notice| {
                    warn!(
                        asset_path = %path,
                        chunk_index = index,
                        attempt = notice.attempt,
                        delay_ms = notice.delay.as_millis() as u64,
                        error = %notice.error,
                        "Chunk upload failed, retrying"
                    )
                },
                |_attempt| {
                    let chunk = ChunkUpload {
                        upload_id: session.upload_id().to_string(),
                        asset_path: path.to_string(),
                        asset_doc_id: Some(asset.record.doc_id.clone()).filter(|d| !d.is_empty()),
                        chunk_index: index,
                        total_chunks: transfer.total_chunks,
                        total_size: size,
                        data: data.to_vec(),
                    };
                    async move {
                        let started = Instant::now();
                        client.upload_chunk(chunk).await?;
                        Ok::<_, SyncError>(started.elapsed())
                    }
                },
            )
            .await;

        // requests that finish after cancellation must not touch session state
        cancel.check()?;

        match result {
            Ok(elapsed) => {
                self.speed
                    .lock()
                    .await
                    .record(range.len(), elapsed.as_millis() as u64);
                session.record_chunk(path, index, range.len()).await;
                Ok(ChunkOutcome::Stored)
            }
            Err(SyncError::MissingChunks { indices, .. }) => {
                session.record_chunk(path, index, range.len()).await;
                Ok(ChunkOutcome::Incomplete(indices))
            }
            Err(e) => Err(e),
        }
    }
}

/// Union of all missing indices reported in a batch of outcomes.
fn reported_missing(outcomes: Vec<ChunkOutcome>) -> Option<Vec<u32>> {
    let missing: BTreeSet<u32> = outcomes
        .into_iter()
        .filter_map(|o| match o {
            ChunkOutcome::Incomplete(indices) => Some(indices),
            ChunkOutcome::Stored => None,
        })
        .flatten()
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(missing.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEmitter;
    use crate::testing::{Call, MockRemote};
    use docshare_core::{AssetRecord, ChunkLimits, KIB};

    fn asset(path: &str, size: usize) -> LocalAsset {
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        LocalAsset {
            record: AssetRecord {
                path: path.into(),
                doc_id: "doc-1".into(),
                size: size as u64,
                hash: docshare_core::hash::sha256_hex(&bytes),
            },
            bytes: bytes.into(),
        }
    }

    /// 1 KiB chunks so small test assets span several requests.
    fn uploader(remote: Arc<MockRemote>) -> ChunkUploader {
        let planner = ChunkPlanner::new(ChunkLimits { min: KIB, max: KIB });
        ChunkUploader::new(
            remote,
            planner,
            Arc::new(Mutex::new(SpeedTuner::new())),
            &UploadSettings::default(),
        )
    }

    fn session(total_bytes: u64, total_assets: u32) -> UploadSession {
        UploadSession::new("u-1".into(), total_bytes, total_assets, Arc::new(NoOpEmitter))
    }

    fn chunk_calls(remote: &MockRemote) -> Vec<u32> {
        remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chunk { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chunks_cover_asset_and_final_is_last() {
        let remote = Arc::new(MockRemote::new());
        let a = asset("assets/a.bin", 5 * 1024 + 100);
        let s = session(a.record.size, 1);

        let report = uploader(remote.clone())
            .upload_asset(&s, &a, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_chunks, 6);
        let sent = chunk_calls(&remote);
        assert_eq!(sent.len(), 6);
        assert_eq!(*sent.last().unwrap(), 5);

        let mut sorted = sent.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);

        assert_eq!(remote.assembled("assets/a.bin"), a.bytes.to_vec());
        let snapshot = s.snapshot().await;
        assert_eq!(snapshot.uploaded_bytes, a.record.size);
        assert_eq!(snapshot.percent, 100);
    }

    #[tokio::test]
    async fn test_missing_chunks_resends_only_reported() {
        let remote = Arc::new(MockRemote::new());
        remote.script_missing("assets/big.bin", 7, vec![2, 5]);
        let a = asset("assets/big.bin", 8 * 1024);
        let s = session(a.record.size, 1);

        let report = uploader(remote.clone())
            .upload_asset(&s, &a, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.recovery_rounds, 1);
        assert_eq!(report.recovered_chunks, vec![2, 5]);

        let sent = chunk_calls(&remote);
        assert_eq!(sent.len(), 8 + 2);
        let mut recovery = sent[8..].to_vec();
        recovery.sort_unstable();
        assert_eq!(recovery, vec![2, 5]);
        // triggering error never went through backoff
        assert_eq!(sent.iter().filter(|i| **i == 7).count(), 1);

        // re-sent chunks are not double counted
        assert_eq!(s.snapshot().await.uploaded_bytes, a.record.size);
    }

    #[tokio::test]
    async fn test_missing_chunks_give_up_after_limit() {
        let remote = Arc::new(MockRemote::new());
        remote.script_missing("assets/x.bin", 3, vec![1]);
        // first entry is consumed by the initial send of chunk 1
        for _ in 0..4 {
            remote.script_missing("assets/x.bin", 1, vec![1]);
        }
        let a = asset("assets/x.bin", 4 * 1024);
        let s = session(a.record.size, 1);

        let err = uploader(remote.clone())
            .upload_asset(&s, &a, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingChunks { ref indices, .. } if indices == &vec![1]));
        // 4 initial sends + 3 recovery rounds of one chunk each
        assert_eq!(chunk_calls(&remote).len(), 4 + 3);
        assert!(s.snapshot().await.percent < 100);
    }

    #[tokio::test]
    async fn test_missing_only_final_is_fatal() {
        let remote = Arc::new(MockRemote::new());
        remote.script_missing("assets/y.bin", 1, vec![1]);
        let a = asset("assets/y.bin", 2 * 1024);

        let err = uploader(remote.clone())
            .upload_asset(&session(a.record.size, 1), &a, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingChunks { .. }));
        assert_eq!(chunk_calls(&remote).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let remote = Arc::new(MockRemote::new());
        remote.script_transient("assets/t.bin", 0, 2);
        let a = asset("assets/t.bin", 1024 + 1);

        uploader(remote.clone())
            .upload_asset(&session(a.record.size, 1), &a, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(chunk_calls(&remote), vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_cancelled_upload_sends_nothing() {
        let remote = Arc::new(MockRemote::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let a = asset("assets/c.bin", 3000);

        let err = uploader(remote.clone())
            .upload_asset(&session(a.record.size, 1), &a, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(chunk_calls(&remote).is_empty());
    }

    #[tokio::test]
    async fn test_chunk_finishing_after_cancel_is_discarded() {
        let remote = Arc::new(MockRemote::new());
        let gate = remote.gate_chunks();
        let speed = Arc::new(Mutex::new(SpeedTuner::new()));
        let uploader = ChunkUploader::new(
            remote.clone(),
            ChunkPlanner::new(ChunkLimits { min: KIB, max: KIB }),
            speed.clone(),
            &UploadSettings::default(),
        );
        let a = asset("assets/slow.bin", 512);
        let s = session(a.record.size, 1);
        let cancel = CancelToken::new();

        let upload = uploader.upload_asset(&s, &a, &cancel);
        let interrupt = async {
            while chunk_calls(&remote).is_empty() {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
            gate.notify_one();
        };
        let (result, ()) = tokio::join!(upload, interrupt);

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(chunk_calls(&remote), vec![0]);
        assert_eq!(remote.assembled("assets/slow.bin").len(), 512);
        let snapshot = s.snapshot().await;
        assert_eq!(snapshot.uploaded_bytes, 0);
        assert_eq!(snapshot.completed_assets, 0);
        assert_eq!(speed.lock().await.samples(), 0);
    }

    #[tokio::test]
    async fn test_empty_asset_is_one_chunk() {
        let remote = Arc::new(MockRemote::new());
        let a = asset("assets/empty.txt", 0);

        let report = uploader(remote.clone())
            .upload_asset(&session(0, 1), &a, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.total_chunks, 1);
        assert_eq!(chunk_calls(&remote), vec![0]);
    }

    #[tokio::test]
    async fn test_upload_assets_completes_session() {
        let remote = Arc::new(MockRemote::new());
        let a = asset("assets/a.bin", 2048);
        let b = asset("assets/b.bin", 10);
        let s = session(2058, 2);

        let reports = uploader(remote.clone())
            .upload_assets(&s, &[&a, &b], 6, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].path, "assets/a.bin");
        let snapshot = s.snapshot().await;
        assert_eq!(snapshot.completed_assets, 2);
        assert_eq!(snapshot.percent, 100);
    }
}
