//! # Error Types
//!
//! Domain-specific error types for docshare-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  docshare-core errors (this file)                                      │
//! │  ├── CoreError        - Planning failures                              │
//! │  └── ValidationError  - Malformed ids, paths, hashes, limits           │
//! │                                                                         │
//! │  docshare-sync errors (separate crate)                                 │
//! │  └── SyncError        - Network, protocol, cancellation                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → user message          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Planning errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The meta-hash document could not be encoded.
    #[error("Failed to encode document metadata: {0}")]
    MetaEncoding(String),

    /// Chunk geometry requested for an index outside the asset.
    #[error("Chunk {index} out of range for {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MetaEncoding(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any planning runs; these are always fatal to the operation
/// that triggered them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: &'static str },

    /// A document or share id has an unexpected shape.
    #[error("Invalid {field}: '{value}'")]
    InvalidId { field: &'static str, value: String },

    /// An asset path escapes the asset root or is otherwise unusable.
    #[error("Invalid asset path: '{0}'")]
    InvalidAssetPath(String),

    /// A chunk limit pair is unusable (zero, or min above max).
    #[error("Invalid chunk limits: min {min}, max {max}")]
    InvalidChunkLimits { min: u64, max: u64 },
}
