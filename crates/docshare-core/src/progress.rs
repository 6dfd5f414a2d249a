//! # Upload Progress
//!
//! Byte and asset accounting for one upload session.
//!
//! Each chunk is counted once per asset, no matter how many times it is
//! re-sent during missing-chunk recovery. The percentage stays at 99 until
//! every asset is marked complete, so the UI never shows 100% while the
//! server is still assembling files.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Point-in-time view handed to progress listeners.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UploadProgressSnapshot {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub completed_assets: u32,
    pub total_assets: u32,
    pub percent: u8,
}

/// Mutable accounting for one share/update pass.
#[derive(Debug, Clone, Default)]
pub struct UploadProgress {
    total_bytes: u64,
    uploaded_bytes: u64,
    total_assets: u32,
    completed: HashSet<String>,
    counted_chunks: HashMap<String, HashSet<u32>>,
}

impl UploadProgress {
    pub fn new(total_bytes: u64, total_assets: u32) -> Self {
        UploadProgress {
            total_bytes,
            total_assets,
            ..Default::default()
        }
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn completed_assets(&self) -> u32 {
        self.completed.len() as u32
    }

    /// Adds `bytes` for chunk `index` of `asset_path`.
    ///
    /// Returns `false` (and changes nothing) if that chunk was already
    /// counted.
    pub fn record_chunk(&mut self, asset_path: &str, index: u32, bytes: u64) -> bool {
        let chunks = self.counted_chunks.entry(asset_path.to_string()).or_default();
        if !chunks.insert(index) {
            return false;
        }
        self.uploaded_bytes = (self.uploaded_bytes + bytes).min(self.total_bytes);
        true
    }

    pub fn is_chunk_counted(&self, asset_path: &str, index: u32) -> bool {
        self.counted_chunks
            .get(asset_path)
            .is_some_and(|chunks| chunks.contains(&index))
    }

    /// Marks an asset fully stored on the server.
    pub fn complete_asset(&mut self, asset_path: &str) {
        self.completed.insert(asset_path.to_string());
    }

    pub fn is_complete(&self) -> bool {
        self.completed_assets() >= self.total_assets
    }

    /// `uploaded / total` as a whole percentage, clamped to 99 while assets
    /// remain incomplete.
    pub fn percent(&self) -> u8 {
        let raw = if self.total_bytes == 0 {
            100
        } else {
            ((self.uploaded_bytes as f64 / self.total_bytes as f64) * 100.0).floor() as u8
        };
        if self.is_complete() {
            raw.min(100)
        } else {
            raw.min(99)
        }
    }

    pub fn snapshot(&self) -> UploadProgressSnapshot {
        UploadProgressSnapshot {
            uploaded_bytes: self.uploaded_bytes,
            total_bytes: self.total_bytes,
            completed_assets: self.completed_assets(),
            total_assets: self.total_assets,
            percent: self.percent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_counted_once() {
        let mut progress = UploadProgress::new(300, 1);
        assert!(progress.record_chunk("assets/a.bin", 0, 100));
        assert!(progress.record_chunk("assets/a.bin", 1, 100));
        assert!(!progress.record_chunk("assets/a.bin", 1, 100));
        assert_eq!(progress.uploaded_bytes(), 200);
        assert!(progress.is_chunk_counted("assets/a.bin", 0));
        assert!(!progress.is_chunk_counted("assets/b.bin", 0));
    }

    #[test]
    fn test_percent_clamped_until_complete() {
        let mut progress = UploadProgress::new(200, 2);
        progress.record_chunk("assets/a", 0, 100);
        progress.complete_asset("assets/a");
        progress.record_chunk("assets/b", 0, 100);
        assert_eq!(progress.uploaded_bytes(), 200);
        assert_eq!(progress.percent(), 99);

        progress.complete_asset("assets/b");
        assert_eq!(progress.percent(), 100);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.completed_assets, 2);
        assert_eq!(snapshot.percent, 100);
    }

    #[test]
    fn test_empty_session() {
        let progress = UploadProgress::new(0, 0);
        assert!(progress.is_complete());
        assert_eq!(progress.percent(), 100);
    }
}
