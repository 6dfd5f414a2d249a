//! # Speed Tuner
//!
//! Exponentially-weighted moving average of observed upload throughput.
//!
//! ```text
//! speed    = bytes / elapsed_ms * 1000
//! avg      = avg * (1 - α) + speed * α        α = 0.2
//! ```
//!
//! Seeded with [`DEFAULT_SPEED_BYTES_PER_SEC`] until the first sample. Only
//! successful transfers are fed in; failed or aborted chunks never move the
//! estimate.

use crate::{DEFAULT_SPEED_BYTES_PER_SEC, SPEED_EWMA_ALPHA};

/// Throughput estimator in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedTuner {
    avg_speed: f64,
    samples: u64,
}

impl Default for SpeedTuner {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedTuner {
    pub fn new() -> Self {
        SpeedTuner {
            avg_speed: DEFAULT_SPEED_BYTES_PER_SEC,
            samples: 0,
        }
    }

    /// Current estimate in bytes/sec.
    #[inline]
    pub fn avg_speed(&self) -> f64 {
        self.avg_speed
    }

    /// Number of samples recorded since construction.
    #[inline]
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Records one completed transfer.
    ///
    /// Sub-millisecond transfers are measured as 1 ms. Empty transfers carry
    /// no throughput information and are ignored.
    pub fn record(&mut self, bytes: u64, elapsed_ms: u64) {
        if bytes == 0 {
            return;
        }
        let speed = bytes as f64 / elapsed_ms.max(1) as f64 * 1000.0;
        self.avg_speed = self.avg_speed * (1.0 - SPEED_EWMA_ALPHA) + speed * SPEED_EWMA_ALPHA;
        self.samples += 1;
    }

    /// Forgets all samples and returns to the seed value.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
