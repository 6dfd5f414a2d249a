//! # Chunk Planner
//!
//! Derives chunk size and concurrency from the throughput estimate, the file
//! size and the chunk limits negotiated with the server.
//!
//! ## Chunk Size
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  target = avg_speed × 1.8 s                                             │
//! │                                                                         │
//! │  size tiers (raise only):   ≥ 1 GiB   → max limit                       │
//! │                             ≥ 256 MiB → at least 4 MiB                  │
//! │                             ≥ 64 MiB  → at least 2 MiB                  │
//! │                                                                         │
//! │  clamp to [min, max], then cap at file size (small file = one chunk)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Chunk Concurrency
//! ```text
//!  speed (MiB/s)   < 2.5   < 5   < 10   ≥ 10
//!  base               1      2      3      4
//!
//!  file ≥ 32 MiB → at least 2, file ≥ 256 MiB → at least 3
//!  ≤ 2 chunks → 1, ≤ 4 chunks → at most 2, never above the caller's max
//! ```

use tracing::debug;

use crate::error::{CoreError, ValidationError};
use crate::types::ChunkTask;
use crate::{
    DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE, GIB, HARD_MAX_CHUNK_SIZE, MIB,
    TARGET_CHUNK_DURATION_MS,
};

// =============================================================================
// Chunk Limits
// =============================================================================

/// Chunk size bounds, as negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub min: u64,
    pub max: u64,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        ChunkLimits {
            min: DEFAULT_MIN_CHUNK_SIZE,
            max: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl ChunkLimits {
    /// Builds limits from optional server values, falling back to `defaults`
    /// for anything missing or zero. The max never exceeds
    /// [`HARD_MAX_CHUNK_SIZE`] and the min never exceeds the max.
    pub fn negotiate(min: Option<u64>, max: Option<u64>, defaults: ChunkLimits) -> Self {
        let max = max
            .filter(|v| *v > 0)
            .unwrap_or(defaults.max)
            .clamp(1, HARD_MAX_CHUNK_SIZE);
        let min = min.filter(|v| *v > 0).unwrap_or(defaults.min).clamp(1, max);
        ChunkLimits { min, max }
    }

    /// Checks a user-supplied pair (e.g. from config).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min == 0 || self.max == 0 || self.min > self.max || self.max > HARD_MAX_CHUNK_SIZE {
            return Err(ValidationError::InvalidChunkLimits {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Chunk Planner
// =============================================================================

/// Stateless sizing decisions over a fixed set of limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkPlanner {
    limits: ChunkLimits,
}

impl ChunkPlanner {
    pub fn new(limits: ChunkLimits) -> Self {
        ChunkPlanner { limits }
    }

    pub fn limits(&self) -> ChunkLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: ChunkLimits) {
        self.limits = limits;
    }

    /// Chunk size for a file of `file_size` bytes at `avg_speed` bytes/sec.
    ///
    /// Always within `[min, max]`, except that a file smaller than `min` is
    /// sent as a single chunk of its own size.
    pub fn chunk_size(&self, file_size: u64, avg_speed: f64) -> u64 {
        let ChunkLimits { min, max } = self.limits;

        let mut target = if avg_speed.is_finite() && avg_speed > 0.0 {
            (avg_speed * TARGET_CHUNK_DURATION_MS / 1000.0) as u64
        } else {
            min
        };

        if file_size >= GIB {
            target = max;
        } else if file_size >= 256 * MIB {
            target = target.max(4 * MIB);
        } else if file_size >= 64 * MIB {
            target = target.max(2 * MIB);
        }

        let mut size = target.clamp(min, max);
        if file_size > 0 {
            size = size.min(file_size);
        }
        size
    }

    /// Number of in-flight chunk requests for one asset.
    pub fn chunk_concurrency(
        &self,
        file_size: u64,
        chunk_size: u64,
        max_concurrency: usize,
        avg_speed: f64,
    ) -> usize {
        let max_concurrency = max_concurrency.max(1);
        let speed_mib = avg_speed / MIB as f64;

        let mut concurrency: usize = if speed_mib < 2.5 {
            1
        } else if speed_mib < 5.0 {
            2
        } else if speed_mib < 10.0 {
            3
        } else {
            4
        };

        if file_size >= 256 * MIB {
            concurrency = concurrency.max(3);
        } else if file_size >= 32 * MIB {
            concurrency = concurrency.max(2);
        }

        concurrency = concurrency.min(max_concurrency);

        let total = total_chunks(file_size, chunk_size);
        if total <= 2 {
            concurrency = 1;
        } else if total <= 4 {
            concurrency = concurrency.min(2);
        }

        concurrency.min(max_concurrency).max(1)
    }

    /// Number of assets uploaded side by side.
    ///
    /// Many small assets raise concurrency; a few very large ones pull it
    /// toward 1 so they do not starve each other. The result never exceeds
    /// `min(max_concurrency, total_asset_count)`.
    pub fn asset_concurrency(
        &self,
        total_bytes: u64,
        total_asset_count: usize,
        max_concurrency: usize,
        sizes: &[u64],
        avg_speed: f64,
    ) -> usize {
        if total_asset_count == 0 {
            return 0;
        }
        let ceiling = max_concurrency.max(1).min(total_asset_count);

        let mut concurrency: usize = match total_asset_count {
            1 => 1,
            2..=4 => 2,
            5..=16 => 3,
            17..=64 => 4,
            _ => 6,
        };

        let mut sorted = sizes.to_vec();
        sorted.sort_unstable();
        let median = percentile(&sorted, 0.5);
        let p90 = percentile(&sorted, 0.9);
        let largest = sorted.last().copied().unwrap_or(0);

        let speed_mib = avg_speed / MIB as f64;
        if speed_mib >= 10.0 && median < MIB {
            concurrency += 2;
        } else if speed_mib >= 5.0 && median < 4 * MIB {
            concurrency += 1;
        }

        let size_cap = if largest >= 128 * MIB {
            1
        } else if largest >= 64 * MIB {
            2
        } else if largest >= 32 * MIB && largest.saturating_mul(2) >= total_bytes {
            2
        } else if p90 >= 16 * MIB {
            3
        } else {
            usize::MAX
        };

        let result = concurrency.min(size_cap).min(ceiling).max(1);
        debug!(
            total_asset_count,
            total_bytes, median, p90, largest, result, "Asset concurrency selected"
        );
        result
    }
}

// =============================================================================
// Chunk Geometry
// =============================================================================

/// `ceil(size / chunk_size)`, with an empty file still sent as one chunk.
pub fn total_chunks(size: u64, chunk_size: u64) -> u32 {
    if size == 0 || chunk_size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size) as u32
}

/// Byte range of chunk `index`.
pub fn chunk_task(size: u64, chunk_size: u64, index: u32) -> Result<ChunkTask, CoreError> {
    let total = total_chunks(size, chunk_size);
    if index >= total {
        return Err(CoreError::ChunkOutOfRange { index, total });
    }
    let start = (index as u64 * chunk_size).min(size);
    let end = (start + chunk_size).min(size);
    Ok(ChunkTask { index, start, end })
}

/// Every chunk of an asset, in index order, covering `[0, size)` exactly.
pub fn chunk_tasks(size: u64, chunk_size: u64) -> Vec<ChunkTask> {
    let total = total_chunks(size, chunk_size);
    (0..total)
        .filter_map(|index| chunk_task(size, chunk_size, index).ok())
        .collect()
}

fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
