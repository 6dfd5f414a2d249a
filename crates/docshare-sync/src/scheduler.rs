//! # Background Reconciliation Scheduler
//!
//! Periodically re-verifies the API key and refreshes the share list so a
//! long-running editor notices shares changed elsewhere.
//!
//! ## Delay Model
//! ```text
//!              min            max        growth
//!  visible   180 s  ──────►  3 h          ×1.6 per unchanged cycle
//!  hidden    600 s  ──────►  3 h          reset to min on change / failure
//!
//!  cycle 1 ─ 180 s ─► cycle 2 ─ 288 s ─► cycle 3 ─ 460.8 s ─► ...
//!            (+ up to jitter_secs of random delay on every wait)
//! ```
//!
//! ## Loop
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │  select!                                                     │
//!  │    command  ── SetVisible / SetOnline / Trigger / Shutdown   │
//!  │    timer    ── offline or no credentials? ─► skip            │
//!  │                otherwise spawn one reconcile (single-flight) │
//!  │    cycle    ── finished ─► DelayController ─► next timer     │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Background failures never surface to the user; they are logged at debug
//! and only shorten the next delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::config::SchedulerSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Reconciler
// =============================================================================

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The share list differs from what the previous cycle saw.
    pub changed: bool,
}

/// The work a background cycle performs.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn has_credentials(&self) -> bool;

    async fn reconcile(&self) -> SyncResult<ReconcileOutcome>;
}

// =============================================================================
// Delay Controller
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn from_visible(visible: bool) -> Self {
        if visible {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DelayRange {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl DelayRange {
    fn new(min_secs: u64, max_secs: u64) -> Self {
        let min = Duration::from_secs(min_secs);
        let max = Duration::from_secs(max_secs.max(min_secs));
        DelayRange { min, max, current: min }
    }
}

/// Adaptive delay bookkeeping, one current delay per visibility state.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayController {
    visible: DelayRange,
    hidden: DelayRange,
    growth: f64,
}

impl DelayController {
    pub fn new(settings: &SchedulerSettings) -> Self {
        DelayController {
            visible: DelayRange::new(settings.visible_min_secs, settings.visible_max_secs),
            hidden: DelayRange::new(settings.hidden_min_secs, settings.hidden_max_secs),
            growth: settings.growth_factor,
        }
    }

    fn range(&self, visibility: Visibility) -> &DelayRange {
        match visibility {
            Visibility::Visible => &self.visible,
            Visibility::Hidden => &self.hidden,
        }
    }

    fn range_mut(&mut self, visibility: Visibility) -> &mut DelayRange {
        match visibility {
            Visibility::Visible => &mut self.visible,
            Visibility::Hidden => &mut self.hidden,
        }
    }

    /// Delay before the next cycle, without jitter.
    pub fn current(&self, visibility: Visibility) -> Duration {
        self.range(visibility).current
    }

    /// Successful cycle: grow when unchanged, reset when something changed.
    pub fn on_success(&mut self, visibility: Visibility, changed: bool) {
        if changed {
            self.reset(visibility);
            return;
        }
        let growth = self.growth;
        let range = self.range_mut(visibility);
        range.current = range.current.mul_f64(growth).min(range.max);
    }

    pub fn on_failure(&mut self, visibility: Visibility) {
        self.reset(visibility);
    }

    pub fn reset(&mut self, visibility: Visibility) {
        let range = self.range_mut(visibility);
        range.current = range.min;
    }
}

/// Random delay in `[0, max_secs]` seconds.
fn jitter(max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..=max_secs as f64);
    Duration::from_secs_f64(secs)
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Offline or no API key; nothing was requested.
    Skipped,
    Unchanged,
    Changed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub last_outcome: Option<CycleOutcome>,
    /// Delay (before jitter) chosen for the next cycle.
    pub current_delay: Duration,
    /// Reconciliations actually run; skipped cycles are not counted.
    pub cycles_run: u64,
    pub visible: bool,
    pub online: bool,
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug)]
enum SchedulerCommand {
    SetVisible(bool),
    SetOnline(bool),
    Trigger,
    Shutdown,
}

/// Handle for controlling a spawned scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<SchedulerCommand>,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerHandle {
    async fn send(&self, cmd: SchedulerCommand) -> SyncResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::Internal("Scheduler channel closed".into()))
    }

    pub async fn set_visible(&self, visible: bool) -> SyncResult<()> {
        self.send(SchedulerCommand::SetVisible(visible)).await
    }

    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        self.send(SchedulerCommand::SetOnline(online)).await
    }

    /// Runs a cycle as soon as no other cycle is in flight.
    pub async fn trigger(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::Trigger).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::Shutdown).await
    }
}

type CycleHandle = JoinHandle<SyncResult<ReconcileOutcome>>;

pub struct SyncScheduler {
    reconciler: Arc<dyn Reconciler>,
    settings: SchedulerSettings,
    delays: DelayController,
    visible: bool,
    online: bool,
    in_flight: Arc<AtomicBool>,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SyncScheduler {
    /// Starts the loop and returns a handle. The first cycle runs after the
    /// visible minimum delay.
    pub fn spawn(reconciler: Arc<dyn Reconciler>, settings: SchedulerSettings) -> SchedulerHandle {
        let delays = DelayController::new(&settings);
        let status = Arc::new(RwLock::new(SchedulerStatus {
            last_outcome: None,
            current_delay: delays.current(Visibility::Visible),
            cycles_run: 0,
            visible: true,
            online: true,
        }));

        let scheduler = SyncScheduler {
            reconciler,
            settings,
            delays,
            visible: true,
            online: true,
            in_flight: Arc::new(AtomicBool::new(false)),
            status: status.clone(),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        tokio::spawn(async move {
            scheduler.run(cmd_rx).await;
        });

        SchedulerHandle { cmd_tx, status }
    }

    fn visibility(&self) -> Visibility {
        Visibility::from_visible(self.visible)
    }

    fn next_deadline(&self) -> Instant {
        Instant::now() + self.delays.current(self.visibility()) + jitter(self.settings.jitter_secs)
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SchedulerCommand>) {
        info!(enabled = self.settings.enabled, "Sync scheduler started");

        let mut next = self.next_deadline();
        let mut cycle: Option<CycleHandle> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(SchedulerCommand::Shutdown) => {
                            info!("Sync scheduler shutting down");
                            if let Some(handle) = cycle.take() {
                                handle.abort();
                            }
                            break;
                        }
                        Some(SchedulerCommand::SetVisible(visible)) => {
                            if visible != self.visible {
                                self.visible = visible;
                                next = self.next_deadline();
                                debug!(visible, "Visibility changed");
                                self.publish(None).await;
                            }
                        }
                        Some(SchedulerCommand::SetOnline(online)) => {
                            let came_online = online && !self.online;
                            self.online = online;
                            if came_online {
                                next = Instant::now();
                            }
                            debug!(online, "Connectivity changed");
                            self.publish(None).await;
                        }
                        Some(SchedulerCommand::Trigger) => {
                            if cycle.is_some() {
                                debug!("Cycle already running, trigger ignored");
                            } else {
                                next = Instant::now();
                            }
                        }
                    }
                }
                _ = sleep_until(next), if cycle.is_none() => {
                    match self.start_cycle() {
                        Some(handle) => cycle = Some(handle),
                        None => {
                            self.publish(Some(CycleOutcome::Skipped)).await;
                            next = self.next_deadline();
                        }
                    }
                }
                joined = join_cycle(&mut cycle) => {
                    cycle = None;
                    self.in_flight.store(false, Ordering::SeqCst);
                    self.finish_cycle(joined).await;
                    next = self.next_deadline();
                }
            }
        }
    }

    /// Spawns a reconciliation unless the cycle must be skipped or one is
    /// already running.
    fn start_cycle(&self) -> Option<CycleHandle> {
        if !self.settings.enabled {
            return None;
        }
        if !self.online {
            debug!("Offline, skipping background sync");
            return None;
        }
        if !self.reconciler.has_credentials() {
            debug!("No credentials, skipping background sync");
            return None;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }

        let reconciler = self.reconciler.clone();
        Some(tokio::spawn(async move { reconciler.reconcile().await }))
    }

    async fn finish_cycle(&mut self, joined: Result<SyncResult<ReconcileOutcome>, JoinError>) {
        let visibility = self.visibility();
        let outcome = match joined {
            Ok(Ok(result)) => {
                self.delays.on_success(visibility, result.changed);
                if result.changed {
                    info!("Share list changed on the server");
                    CycleOutcome::Changed
                } else {
                    CycleOutcome::Unchanged
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Background sync failed");
                self.delays.on_failure(visibility);
                CycleOutcome::Failed(e.to_string())
            }
            Err(e) => {
                debug!(error = %e, "Background sync task aborted");
                self.delays.on_failure(visibility);
                CycleOutcome::Failed(e.to_string())
            }
        };

        self.status.write().await.cycles_run += 1;
        self.publish(Some(outcome)).await;
    }

    async fn publish(&self, outcome: Option<CycleOutcome>) {
        let mut status = self.status.write().await;
        if let Some(outcome) = outcome {
            status.last_outcome = Some(outcome);
        }
        status.current_delay = self.delays.current(self.visibility());
        status.visible = self.visible;
        status.online = self.online;
    }
}

async fn join_cycle(cycle: &mut Option<CycleHandle>) -> Result<SyncResult<ReconcileOutcome>, JoinError> {
    match cycle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            jitter_secs: 0,
            ..Default::default()
        }
    }

    fn assert_secs(actual: Duration, expected: f64) {
        assert!(
            (actual.as_secs_f64() - expected).abs() < 1e-6,
            "expected {expected}s, got {actual:?}"
        );
    }

    // -------------------------------------------------------------------------
    // DelayController
    // -------------------------------------------------------------------------

    #[test]
    fn test_unchanged_cycles_grow_delay() {
        let mut delays = DelayController::new(&settings());
        let vis = Visibility::Visible;

        assert_secs(delays.current(vis), 180.0);
        delays.on_success(vis, false);
        assert_secs(delays.current(vis), 288.0);
        delays.on_success(vis, false);
        assert_secs(delays.current(vis), 460.8);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut delays = DelayController::new(&settings());
        for _ in 0..50 {
            delays.on_success(Visibility::Hidden, false);
        }
        assert_eq!(delays.current(Visibility::Hidden), Duration::from_secs(10_800));
    }

    #[test]
    fn test_change_and_failure_reset_to_min() {
        let mut delays = DelayController::new(&settings());
        let vis = Visibility::Visible;

        delays.on_success(vis, false);
        delays.on_success(vis, false);
        delays.on_success(vis, true);
        assert_secs(delays.current(vis), 180.0);

        delays.on_success(vis, false);
        delays.on_failure(vis);
        assert_secs(delays.current(vis), 180.0);
    }

    #[test]
    fn test_visibility_states_are_independent() {
        let mut delays = DelayController::new(&settings());
        delays.on_success(Visibility::Visible, false);

        assert_secs(delays.current(Visibility::Visible), 288.0);
        assert_secs(delays.current(Visibility::Hidden), 600.0);
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(60) <= Duration::from_secs(60));
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    struct Scripted {
        credentials: bool,
        calls: AtomicU32,
        results: Mutex<VecDeque<SyncResult<ReconcileOutcome>>>,
    }

    impl Scripted {
        fn new(credentials: bool, results: Vec<SyncResult<ReconcileOutcome>>) -> Arc<Self> {
            Arc::new(Scripted {
                credentials,
                calls: AtomicU32::new(0),
                results: Mutex::new(results.into()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reconciler for Scripted {
        fn has_credentials(&self) -> bool {
            self.credentials
        }

        async fn reconcile(&self) -> SyncResult<ReconcileOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ReconcileOutcome::default()))
        }
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_follows_growing_delays() {
        let reconciler = Scripted::new(true, vec![]);
        let handle = SyncScheduler::spawn(reconciler.clone(), settings());

        advance(179.0).await;
        assert_eq!(reconciler.calls(), 0);
        advance(2.0).await;
        assert_eq!(reconciler.calls(), 1);

        // next wait is 288 s
        advance(286.0).await;
        assert_eq!(reconciler.calls(), 1);
        advance(2.0).await;
        assert_eq!(reconciler.calls(), 2);

        let status = handle.status().await;
        assert_eq!(status.cycles_run, 2);
        assert_eq!(status.last_outcome, Some(CycleOutcome::Unchanged));
        assert_secs(status.current_delay, 460.8);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_resets_delay_silently() {
        let reconciler = Scripted::new(
            true,
            vec![
                Ok(ReconcileOutcome { changed: false }),
                Err(SyncError::Network("down".into())),
            ],
        );
        let handle = SyncScheduler::spawn(reconciler.clone(), settings());

        advance(181.0).await;
        advance(289.0).await;
        assert_eq!(reconciler.calls(), 2);

        let status = handle.status().await;
        assert!(matches!(status.last_outcome, Some(CycleOutcome::Failed(_))));
        assert_secs(status.current_delay, 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_without_credentials_or_when_offline() {
        let no_key = Scripted::new(false, vec![]);
        let handle = SyncScheduler::spawn(no_key.clone(), settings());
        advance(400.0).await;
        assert_eq!(no_key.calls(), 0);
        assert_eq!(handle.status().await.last_outcome, Some(CycleOutcome::Skipped));
        assert_eq!(handle.status().await.cycles_run, 0);

        let offline = Scripted::new(true, vec![]);
        let handle = SyncScheduler::spawn(offline.clone(), settings());
        handle.set_online(false).await.unwrap();
        advance(400.0).await;
        assert_eq!(offline.calls(), 0);

        // coming back online runs a cycle right away
        handle.set_online(true).await.unwrap();
        advance(1.0).await;
        assert_eq!(offline.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_and_hidden_delay() {
        let reconciler = Scripted::new(true, vec![]);
        let handle = SyncScheduler::spawn(reconciler.clone(), settings());

        handle.trigger().await.unwrap();
        advance(1.0).await;
        assert_eq!(reconciler.calls(), 1);

        handle.set_visible(false).await.unwrap();
        advance(1.0).await;
        let status = handle.status().await;
        assert!(!status.visible);
        assert_secs(status.current_delay, 600.0);

        advance(598.0).await;
        assert_eq!(reconciler.calls(), 1);
        advance(3.0).await;
        assert_eq!(reconciler.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_handle() {
        let reconciler = Scripted::new(true, vec![]);
        let handle = SyncScheduler::spawn(reconciler.clone(), settings());

        handle.shutdown().await.unwrap();
        advance(1.0).await;
        assert!(handle.trigger().await.is_err());

        advance(1000.0).await;
        assert_eq!(reconciler.calls(), 0);
    }
}
