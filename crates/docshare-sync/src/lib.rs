//! # docshare-sync: Upload Engine for DocShare
//!
//! This crate owns everything in DocShare that waits: HTTP calls, retry
//! sleeps, worker pools and the background reconciliation loop. Decisions
//! about what to upload and how to chunk it come from `docshare-core`.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Share Engine Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    ShareEngine (engine context)                  │  │
//! │  │                                                                  │  │
//! │  │  One per connected workspace; torn down by disconnect()          │  │
//! │  │  share / verify / list / access / delete                         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ DocumentHost   │  │ ChunkUploader  │  │  RemoteClient          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Markdown export│  │ TaskPool       │  │ X-Api-Key over HTTPS   │    │
//! │  │ Asset bytes    │  │ RetryPolicy    │  │ {code, msg, data}      │    │
//! │  │ Metadata probes│  │ Missing-chunk  │  │ envelopes              │    │
//! │  │                │  │ recovery       │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                        SyncScheduler                            │   │
//! │  │                                                                 │   │
//! │  │ verify + list on an adaptive, visibility-aware delay            │   │
//! │  │ single-flight; failures are silent                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  EVENTS (to the editor UI):                                             │
//! │  • "share://progress" - Upload progress snapshots                       │
//! │  • "share://status"   - Phase changes                                   │
//! │  • "share://error"    - Localised failure messages                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Primitives
//! - [`cancel`] - Cooperative cancellation tokens
//! - [`task_pool`] - Bounded-concurrency runner
//! - [`retry`] - Exponential backoff with jitter
//!
//! ### Wire
//! - [`protocol`] - Endpoints and request/response shapes
//! - [`client`] - `RemoteClient` trait and its HTTP implementation
//!
//! ### Engine
//! - [`host`] - Host editor collaborators
//! - [`uploader`] - Chunked asset upload
//! - [`engine`] - Share flows and engine state
//! - [`scheduler`] - Background reconciliation
//! - [`events`] - Progress/status notifications
//! - [`config`] - Engine configuration
//! - [`error`] - Error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docshare_sync::{HttpRemoteClient, ShareEngine, ShareOptions, ShareTarget, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let client = Arc::new(HttpRemoteClient::new(&config.server)?);
//! let engine = ShareEngine::new(config, client, host);
//!
//! let outcome = engine
//!     .share(ShareTarget::Notebook(id), ShareOptions::default(), &engine.cancel_token())
//!     .await?;
//! println!("{} docs updated", outcome.summary.updated_docs);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cancel;
pub mod retry;
pub mod task_pool;

pub mod client;
pub mod protocol;

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod scheduler;
pub mod uploader;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use cancel::CancelToken;
pub use retry::RetryPolicy;
pub use task_pool::TaskPool;

pub use client::{HttpRemoteClient, RemoteClient};
pub use protocol::{AccessSetting, AccessUpdate, ServerInfo, ShareRecord};

pub use config::{SchedulerSettings, ServerSettings, SyncConfig, UploadSettings};
pub use engine::{ShareEngine, ShareOptions, ShareOutcome, ShareTarget};
pub use error::{ErrorClass, SyncError, SyncResult};
pub use events::{NoOpEmitter, ShareEventEmitter};
pub use host::{DocMeta, DocMetaProbe, DocumentHost, ExportedDoc, FetchedAsset, ProbeChain};
pub use scheduler::{
    CycleOutcome, DelayController, ReconcileOutcome, Reconciler, SchedulerHandle, SchedulerStatus,
    SyncScheduler, Visibility,
};
pub use uploader::{AssetUploadReport, ChunkUploader, UploadSession};
