//! # Sync Error Types
//!
//! Error types for share, upload and reconciliation operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network        │  │  Api {code, msg}        │ │
//! │  │  MissingCreds   │  │  Timeout        │  │  MissingChunks          │ │
//! │  │  InvalidUrl     │  │  HttpStatus     │  │  Deserialization        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │   Validation    │  │                 Engine                      │  │
//! │  │                 │  │                                             │  │
//! │  │  Validation     │  │  Cancelled   ShareBusy   Host   Core        │  │
//! │  │  MissingUploadId│  │  Internal                                   │  │
//! │  │  MissingShareId │  │                                             │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Classification
//! The retry loop never inspects variants directly. It asks
//! [`SyncError::classify`] and branches on [`ErrorClass`]:
//!
//! | Class                          | Handling                              |
//! |--------------------------------|---------------------------------------|
//! | `Retryable`                    | backoff, then try again               |
//! | `NonRetryableMissingChunks(i)` | returned at once; uploader re-sends i |
//! | `Cancelled`                    | returned at once                      |
//! | `Fatal`                        | returned at once                      |

use docshare_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server URL or API key not configured.
    #[error("Server URL and API key are required. Run `docshare verify` after configuring them.")]
    MissingCredentials,

    /// Invalid server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Request could not be sent or the connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Application-level error (`code != 0` in the response envelope).
    #[error("Server error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// The server reported chunks it never received for an asset.
    #[error("Server is missing chunks {indices:?} of {asset_path}")]
    MissingChunks { asset_path: String, indices: Vec<u32> },

    /// Response body could not be decoded.
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Invalid input (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Upload init returned no upload id.
    #[error("Server did not return an upload id")]
    MissingUploadId,

    /// Operation requires a share id.
    #[error("Share id is required")]
    MissingShareId,

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Another upload for the same share is still running.
    #[error("An upload for {0} is already in progress")]
    ShareBusy(String),

    /// Host collaborator (export, asset fetch) failed.
    #[error("Host error: {0}")]
    Host(String),

    /// Planning failure from docshare-core.
    #[error("Planning error: {0}")]
    Core(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Core(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::Deserialization(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Deserialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Classification (for retry logic)
// =============================================================================

/// How the retry loop treats a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; back off and try again.
    Retryable,
    /// The server wants exactly these chunks again. Never blind-retried.
    NonRetryableMissingChunks(Vec<u32>),
    /// Cancellation was requested.
    Cancelled,
    /// Anything else. Surfaced as-is.
    Fatal,
}

impl SyncError {
    /// Tags this error for the retry loop.
    ///
    /// ## Retryable Errors
    /// - Connection failures
    /// - Timeouts
    /// - HTTP 408, 429 and 5xx
    ///
    /// Application errors (`code != 0`) are fatal unless they carry
    /// `missingChunks`.
    pub fn classify(&self) -> ErrorClass {
        match self {
            SyncError::Cancelled => ErrorClass::Cancelled,
            SyncError::MissingChunks { indices, .. } => {
                ErrorClass::NonRetryableMissingChunks(indices.clone())
            }
            SyncError::Network(_) | SyncError::Timeout(_) => ErrorClass::Retryable,
            SyncError::HttpStatus { status, .. } if is_retryable_status(*status) => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if the retry loop would try again.
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingCredentials
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Short message for foreground failures.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Cancelled => "Share cancelled.".to_string(),
            SyncError::MissingCredentials => {
                "Configure the server URL and API key first.".to_string()
            }
            SyncError::ShareBusy(_) => {
                "This document is already being shared. Try again when it finishes.".to_string()
            }
            SyncError::Network(_) | SyncError::Timeout(_) => {
                "Could not reach the share server. Check your connection.".to_string()
            }
            SyncError::HttpStatus { status: 401 | 403, .. } => {
                "The share server rejected the API key.".to_string()
            }
            SyncError::Api { msg, .. } if !msg.is_empty() => format!("Share failed: {msg}"),
            SyncError::MissingChunks { asset_path, .. } => {
                format!("Upload of {asset_path} did not complete. Please retry.")
            }
            other => format!("Share failed: {other}"),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(SyncError::Network("reset".into()).classify(), ErrorClass::Retryable);
        assert_eq!(SyncError::Timeout("30s".into()).classify(), ErrorClass::Retryable);
        assert_eq!(
            SyncError::HttpStatus { status: 503, body: String::new() }.classify(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SyncError::HttpStatus { status: 429, body: String::new() }.classify(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SyncError::HttpStatus { status: 404, body: String::new() }.classify(),
            ErrorClass::Fatal
        );
        assert_eq!(
            SyncError::Api { code: 1, msg: "bad".into() }.classify(),
            ErrorClass::Fatal
        );
        assert_eq!(SyncError::Cancelled.classify(), ErrorClass::Cancelled);
        assert_eq!(SyncError::MissingShareId.classify(), ErrorClass::Fatal);
    }

    #[test]
    fn test_missing_chunks_is_explicit_case() {
        let err = SyncError::MissingChunks {
            asset_path: "assets/a.png".into(),
            indices: vec![2, 5],
        };
        assert_eq!(err.classify(), ErrorClass::NonRetryableMissingChunks(vec![2, 5]));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_core_validation_is_unwrapped() {
        let err: SyncError = CoreError::Validation(ValidationError::Required { field: "shareId" }).into();
        assert!(matches!(err, SyncError::Validation(_)));

        let err: SyncError = CoreError::ChunkOutOfRange { index: 3, total: 2 }.into();
        assert!(matches!(err, SyncError::Core(_)));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(SyncError::Cancelled.user_message(), "Share cancelled.");
        assert!(SyncError::Api { code: 7, msg: "quota exceeded".into() }
            .user_message()
            .contains("quota exceeded"));
        assert!(SyncError::MissingCredentials.is_config_error());
    }
}
