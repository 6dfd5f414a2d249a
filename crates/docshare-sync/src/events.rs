//! # Share Events
//!
//! Progress and status notifications for whatever UI drives the engine.
//!
//! ```text
//!   "share://progress" - { uploadedBytes, totalBytes, completedAssets, totalAssets, percent }
//!   "share://status"   - free-form status line ("Uploading assets", ...)
//!   "share://error"    - localized failure message
//! ```

use docshare_core::UploadProgressSnapshot;

/// Receiver of engine events (implemented by the editor plugin or CLI).
pub trait ShareEventEmitter: Send + Sync {
    fn emit_progress(&self, progress: &UploadProgressSnapshot);

    fn emit_status(&self, message: &str);

    fn emit_error(&self, message: &str);
}

/// No-op event emitter for headless use and tests.
pub struct NoOpEmitter;

impl ShareEventEmitter for NoOpEmitter {
    fn emit_progress(&self, _progress: &UploadProgressSnapshot) {}
    fn emit_status(&self, _message: &str) {}
    fn emit_error(&self, _message: &str) {}
}
