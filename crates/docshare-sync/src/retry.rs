//! # Retry Policy
//!
//! Exponential backoff with jitter, driven by [`ErrorClass`].
//!
//! ## Backoff Schedule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt   base delay                      slept                        │
//! │  ───────   ──────────                      ─────                        │
//! │     1      min(max, base × 2^0) = 400 ms   400..480 ms                  │
//! │     2      min(max, base × 2^1) = 800 ms   800..960 ms                  │
//! │     3      1600 ms                         1600..1920 ms                │
//! │     4      2000 ms (capped)                2000..2400 ms                │
//! │     5      no sleep: budget exhausted, last error returned              │
//! │                                                                         │
//! │  Jitter: uniform in [0, 20%] of the base delay, always added.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only [`ErrorClass::Retryable`] failures are retried. Cancellation, missing
//! chunks and fatal errors return on the spot, without sleeping.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::UploadSettings;
use crate::error::{ErrorClass, SyncError, SyncResult};

/// Largest fraction of the base delay added as jitter.
pub const RETRY_JITTER_RATIO: f64 = 0.2;

/// Passed to the `on_retry` observer before each backoff sleep.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a SyncError,
}

/// Attempt budget and delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&UploadSettings::default())
    }
}

impl RetryPolicy {
    /// `retries` is the total number of attempts, at least 1.
    pub fn new(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            retries: retries.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self::new(
            settings.retries,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Base (jitter-free) delay schedule.
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Runs `task` until it succeeds, fails non-retryably, or the attempt
    /// budget runs out.
    ///
    /// The task receives the 1-based attempt number. If `cancel` is already
    /// set the task is never called.
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: &CancelToken,
        mut on_retry: R,
        mut task: F,
    ) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
        R: FnMut(RetryNotice<'_>),
    {
        let mut schedule = self.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;
            cancel.check()?;

            let err = match task(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.classify() {
                ErrorClass::Retryable if attempt < self.retries => {}
                ErrorClass::Retryable => {
                    warn!(attempt, error = %err, "Retry budget exhausted");
                    return Err(err);
                }
                ErrorClass::NonRetryableMissingChunks(_) | ErrorClass::Cancelled | ErrorClass::Fatal => {
                    debug!(attempt, error = %err, "Not retrying");
                    return Err(err);
                }
            }

            let base = schedule.next_backoff().unwrap_or(self.max_delay);
            let delay = base + jitter(base);

            on_retry(RetryNotice {
                attempt,
                delay,
                error: &err,
            });
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            }
        }
    }
}

fn jitter(base: Duration) -> Duration {
    let ratio = rand::thread_rng().gen_range(0.0..=RETRY_JITTER_RATIO);
    base.mul_f64(ratio)
}
