//! # docshare-core: Pure Planning Logic for DocShare
//!
//! This crate is the deterministic half of the DocShare upload engine. It
//! decides *what* to upload and *how big / how parallel* each transfer should
//! be, without ever touching the network, the clock or the file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DocShare Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Host editor (exports markdown + assets)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ docshare-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   hash    │  │   diff    │  │  planner  │  │  progress │  │   │
//! │  │   │ SHA-256   │  │ SyncPlan  │  │ chunking  │  │ 99% clamp │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              docshare-sync (ChunkUploader, scheduler)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Data model (DocRecord, AssetRecord, SyncPlan, ...)
//! - [`hash`] - Content / meta / asset digests
//! - [`assets`] - Asset path sanitisation and reference extraction
//! - [`diff`] - ContentDiffEngine: local state and upload plans
//! - [`speed`] - SpeedTuner (EWMA throughput estimate)
//! - [`planner`] - ChunkPlanner: chunk size and concurrency
//! - [`progress`] - Upload session byte accounting
//! - [`validation`] - Id and hash shape checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use docshare_core::planner::{ChunkLimits, ChunkPlanner};
//! use docshare_core::MIB;
//!
//! let planner = ChunkPlanner::new(ChunkLimits::default());
//! // 2 MiB/s observed throughput: target is 1.8 s worth of bytes
//! let size = planner.chunk_size(50 * MIB, 2.0 * MIB as f64);
//! assert!(size > 3 * MIB && size < 4 * MIB);
//! ```

pub mod assets;
pub mod diff;
pub mod error;
pub mod hash;
pub mod planner;
pub mod progress;
pub mod speed;
pub mod types;
pub mod validation;

pub use diff::{ContentDiffEngine, LocalAsset, LocalState};
pub use error::{CoreError, ValidationError};
pub use planner::{ChunkLimits, ChunkPlanner};
pub use progress::{UploadProgress, UploadProgressSnapshot};
pub use speed::SpeedTuner;
pub use types::*;

// =============================================================================
// Size Units
// =============================================================================

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Smallest chunk the planner produces when the server advertises no limits.
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 256 * KIB;

/// Largest chunk the planner produces when the server advertises no limits.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 8 * MIB;

/// Absolute ceiling on any negotiated chunk size.
pub const HARD_MAX_CHUNK_SIZE: u64 = 10 * MIB;

/// Throughput assumed before the first chunk completes (bytes/sec).
pub const DEFAULT_SPEED_BYTES_PER_SEC: f64 = 2.0 * MIB as f64;

/// Weight of the newest sample in the throughput EWMA.
pub const SPEED_EWMA_ALPHA: f64 = 0.2;

/// A chunk should take roughly this long to transfer at the estimated speed.
pub const TARGET_CHUNK_DURATION_MS: f64 = 1800.0;

/// Rounds of targeted missing-chunk recovery before giving up on an asset.
pub const UPLOAD_MISSING_CHUNK_RETRY_LIMIT: u32 = 3;
