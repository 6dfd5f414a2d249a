//! # Task Pool
//!
//! Bounded-concurrency runner for async tasks.
//!
//! ```text
//!   tasks:   [0] [1] [2] [3] [4] [5] [6]
//!             ▲
//!             └── shared cursor (fetch_add)
//!
//!   worker A: 0 ──► 3 ──► 4 ──► ...
//!   worker B: 1 ──► 5 ──► ...
//!   worker C: 2 ──► 6 ──► ...
//! ```
//!
//! `min(concurrency, len)` workers run inside the caller's task (no spawn).
//! Each worker claims the next unclaimed index until none remain. After the
//! first failure no new index is claimed; tasks already running finish their
//! current unit and the first error is returned. The cancel token is checked
//! before every claim.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use futures_util::future::join_all;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{SyncError, SyncResult};

/// Runs tasks with at most `concurrency` in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    concurrency: usize,
}

impl TaskPool {
    /// A concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        TaskPool {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `task(i)` for every `i` in `0..len`.
    ///
    /// Results are returned in index order.
    pub async fn run_indexed<T, F, Fut>(
        &self,
        len: usize,
        cancel: &CancelToken,
        task: F,
    ) -> SyncResult<Vec<T>>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        if len == 0 {
            return Ok(Vec::new());
        }

        let workers = self.concurrency.min(len);
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<SyncError>> = Mutex::new(None);

        let record = |err: SyncError| {
            failed.store(true, Ordering::SeqCst);
            let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        let (cursor_ref, failed_ref, record_ref, task_ref) = (&cursor, &failed, &record, &task);
        let worker = move || async move {
            let (cursor, failed, record, task) = (cursor_ref, failed_ref, record_ref, task_ref);
            let mut done = Vec::new();
            loop {
                if failed.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = cancel.check() {
                    record(err);
                    break;
                }
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= len {
                    break;
                }
                match task(index).await {
                    Ok(value) => done.push((index, value)),
                    Err(err) => {
                        debug!(index, error = %err, "Task failed, draining pool");
                        record(err);
                        break;
                    }
                }
            }
            done
        };

        let finished = join_all((0..workers).map(|_| worker())).await;

        if let Some(err) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
            return Err(err);
        }

        let mut results: Vec<(usize, T)> = finished.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }

    /// Runs a list of ready-made futures.
    pub async fn run<T, Fut>(&self, tasks: Vec<Fut>, cancel: &CancelToken) -> SyncResult<Vec<T>>
    where
        Fut: Future<Output = SyncResult<T>>,
    {
        let slots: Vec<Mutex<Option<Fut>>> =
            tasks.into_iter().map(|t| Mutex::new(Some(t))).collect();

        self.run_indexed(slots.len(), cancel, |index| {
            let task = slots[index]
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            async move {
                match task {
                    Some(task) => task.await,
                    None => Err(SyncError::Internal(format!("task {index} claimed twice"))),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_runs_all_tasks_within_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();

        let results = TaskPool::new(3)
            .run_indexed(10, &cancel, |i| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 * (i as u64 % 3 + 1))).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                }
            })
            .await
            .unwrap();

        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_error_stops_new_claims() {
        let started = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();

        let result: SyncResult<Vec<()>> = TaskPool::new(1)
            .run_indexed(5, &cancel, |i| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(SyncError::Internal("boom".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Internal(_))));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = AtomicUsize::new(0);

        let result: SyncResult<Vec<()>> = TaskPool::new(4)
            .run_indexed(3, &cancel, |_| {
                started.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_futures_and_empty() {
        let cancel = CancelToken::new();
        let pool = TaskPool::new(0);
        assert_eq!(pool.concurrency(), 1);

        let tasks: Vec<_> = (0..4).map(|i| async move { Ok::<_, SyncError>(i) }).collect();
        assert_eq!(pool.run(tasks, &cancel).await.unwrap(), vec![0, 1, 2, 3]);

        let none: Vec<std::future::Ready<SyncResult<u8>>> = Vec::new();
        assert!(pool.run(none, &cancel).await.unwrap().is_empty());
    }
}
