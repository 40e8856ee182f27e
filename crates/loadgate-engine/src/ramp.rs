//! Ramp controller: keeps the live worker population on the profile's target
//!
//! Every tick the controller interpolates the target concurrency and then:
//! - spawns `target - live` workers when below target
//! - retires the `live - target` longest-running workers when above target
//!
//! Retired workers finish their current iteration and exit on their own; they
//! keep their capacity permit until they do. When the profile is exhausted (or
//! the caller cancels) every worker is signalled and awaited.

use futures::future::BoxFuture;
use futures::FutureExt;
use loadgate_core::{LoadConfig, RampProfile};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSettings {
    /// Interval between target evaluations
    pub tick: Duration,

    /// Capacity: live plus retiring workers never exceed this
    pub max_workers: u32,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            max_workers: 10_000,
        }
    }
}

impl RampSettings {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            tick: config.profile.tick,
            max_workers: config.profile.max_workers,
        }
    }
}

const NO_STAGE: usize = usize::MAX;

#[derive(Debug, Default)]
struct MonitorState {
    target: AtomicU32,
    live: AtomicU32,
    running: AtomicU32,
    stage: AtomicUsize,
}

/// Live view of a ramp, readable from any task.
#[derive(Debug, Clone)]
pub struct RampMonitor {
    state: Arc<MonitorState>,
}

impl Default for RampMonitor {
    fn default() -> Self {
        let state = MonitorState::default();
        state.stage.store(NO_STAGE, Ordering::Relaxed);
        Self {
            state: Arc::new(state),
        }
    }
}

impl RampMonitor {
    /// Target concurrency at the last tick.
    pub fn target(&self) -> u32 {
        self.state.target.load(Ordering::Relaxed)
    }

    /// Workers not asked to stop.
    pub fn live(&self) -> u32 {
        self.state.live.load(Ordering::Relaxed)
    }

    /// Worker tasks that have not exited yet, retiring ones included.
    pub fn running(&self) -> u32 {
        self.state.running.load(Ordering::Relaxed)
    }

    /// Index of the active stage.
    pub fn stage(&self) -> Option<usize> {
        match self.state.stage.load(Ordering::Relaxed) {
            NO_STAGE => None,
            index => Some(index),
        }
    }
}

/// One per-tick observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSample {
    pub elapsed: Duration,
    pub target: u32,
    pub live: u32,
}

/// What the ramp did over the whole run.
#[derive(Debug, Clone, Default)]
pub struct RampReport {
    pub samples: Vec<RampSample>,
    pub peak_live: u32,
    pub spawned: u64,
    pub retired: u64,
    /// Spawns refused for lack of capacity
    pub spawn_shortfall: u64,
    /// Stages with a positive target that never had a live worker
    pub incomplete_stages: Vec<usize>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RampReport {
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.incomplete_stages.is_empty()
    }
}

struct LiveWorker {
    id: u64,
    stop: CancellationToken,
}

/// Per-stage bookkeeping for degraded-capacity detection.
#[derive(Default)]
struct StageWatch {
    index: Option<usize>,
    peak_target: u32,
    peak_live: u32,
    warned: bool,
}

impl StageWatch {
    fn new(index: Option<usize>) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    fn close(&self, incomplete: &mut Vec<usize>) {
        if let Some(index) = self.index {
            if self.peak_target > 0 && self.peak_live == 0 {
                warn!(stage = index, "stage ended without any live worker");
                incomplete.push(index);
            }
        }
    }
}

/// Drives a worker population through a [`RampProfile`].
pub struct RampController {
    profile: RampProfile,
    settings: RampSettings,
    monitor: RampMonitor,
}

impl RampController {
    pub fn new(profile: RampProfile, settings: RampSettings) -> Self {
        Self {
            profile,
            settings,
            monitor: RampMonitor::default(),
        }
    }

    pub fn profile(&self) -> &RampProfile {
        &self.profile
    }

    pub fn monitor(&self) -> RampMonitor {
        self.monitor.clone()
    }

    /// Drive the profile to its end, then drain.
    pub async fn run<F>(&self, spawn_worker: F, cancel: &CancellationToken) -> RampReport
    where
        F: Fn(u64, CancellationToken) -> BoxFuture<'static, ()>,
    {
        self.drive(spawn_worker, cancel).await.drain().await
    }

    /// Tick until the profile is exhausted or `cancel` fires.
    ///
    /// `spawn_worker(id, stop)` builds the future of one worker; it must return
    /// soon after `stop` is cancelled. Workers are still running when this
    /// returns; call [`ActiveRamp::drain`] to stop and await them.
    pub async fn drive<F>(&self, spawn_worker: F, cancel: &CancellationToken) -> ActiveRamp
    where
        F: Fn(u64, CancellationToken) -> BoxFuture<'static, ()>,
    {
        info!(
            profile = %self.profile.description(),
            tick_ms = self.settings.tick.as_millis() as u64,
            max_workers = self.settings.max_workers,
            "ramp started"
        );

        let mut ramp = ActiveRamp {
            run_token: cancel.child_token(),
            capacity: Arc::new(Semaphore::new(self.settings.max_workers as usize)),
            registry: VecDeque::new(),
            tasks: JoinSet::new(),
            monitor: self.monitor.clone(),
            started: Instant::now(),
            next_id: 0,
            report: RampReport::default(),
        };

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watch = StageWatch::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("ramp cancelled");
                    ramp.report.interrupted = true;
                    break;
                }
                _ = ticker.tick() => {}
            }

            let elapsed = ramp.started.elapsed();
            let position = self.profile.position_at(elapsed);
            let index = position.map(|p| p.index);

            if index != watch.index {
                watch.close(&mut ramp.report.incomplete_stages);
                watch = StageWatch::new(index);
                if let Some(index) = index {
                    debug!(stage = index, elapsed_ms = elapsed.as_millis() as u64, "entering stage");
                }
                ramp.monitor
                    .state
                    .stage
                    .store(index.unwrap_or(NO_STAGE), Ordering::Relaxed);
            }

            if position.is_none() {
                break;
            }

            let target = self.profile.target_at(elapsed);
            ramp.adjust(target, &spawn_worker, &mut watch);
            ramp.reap();

            let live = ramp.registry.len() as u32;
            watch.peak_target = watch.peak_target.max(target);
            watch.peak_live = watch.peak_live.max(live);
            ramp.report.peak_live = ramp.report.peak_live.max(live);
            ramp.report.samples.push(RampSample {
                elapsed,
                target,
                live,
            });
        }

        ramp
    }
}

/// Worker population handed from [`RampController::drive`] to draining.
pub struct ActiveRamp {
    run_token: CancellationToken,
    capacity: Arc<Semaphore>,
    registry: VecDeque<LiveWorker>,
    tasks: JoinSet<()>,
    monitor: RampMonitor,
    started: Instant,
    next_id: u64,
    report: RampReport,
}

impl ActiveRamp {
    /// Spawn or retire workers to meet `target`.
    fn adjust<F>(&mut self, target: u32, spawn_worker: &F, watch: &mut StageWatch)
    where
        F: Fn(u64, CancellationToken) -> BoxFuture<'static, ()>,
    {
        let live = self.registry.len() as u32;
        self.monitor.state.target.store(target, Ordering::Relaxed);

        if target > live {
            let wanted = target - live;
            for spawned in 0..wanted {
                let Ok(permit) = Arc::clone(&self.capacity).try_acquire_owned() else {
                    let missing = u64::from(wanted - spawned);
                    self.report.spawn_shortfall += missing;
                    if !watch.warned {
                        watch.warned = true;
                        warn!(
                            target,
                            live = self.registry.len(),
                            running = self.monitor.running(),
                            missing,
                            "worker capacity exhausted, running degraded"
                        );
                    }
                    break;
                };

                let id = self.next_id;
                self.next_id += 1;

                let stop = self.run_token.child_token();
                let worker = spawn_worker(id, stop.clone());
                let state = Arc::clone(&self.monitor.state);
                state.running.fetch_add(1, Ordering::Relaxed);

                self.tasks.spawn(async move {
                    worker.await;
                    drop(permit);
                    state.running.fetch_sub(1, Ordering::Relaxed);
                });

                self.registry.push_back(LiveWorker { id, stop });
                self.report.spawned += 1;
            }
        } else if target < live {
            for _ in 0..(live - target) {
                if let Some(worker) = self.registry.pop_front() {
                    debug!(worker = worker.id, "retiring worker");
                    worker.stop.cancel();
                    self.report.retired += 1;
                }
            }
        }

        self.monitor
            .state
            .live
            .store(self.registry.len() as u32, Ordering::Relaxed);
    }

    /// Collect tasks that already exited.
    fn reap(&mut self) {
        while let Some(Some(result)) = self.tasks.join_next().now_or_never() {
            if let Err(e) = result {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
    }

    /// Signal every worker and wait until all have exited.
    pub async fn drain(mut self) -> RampReport {
        self.run_token.cancel();
        self.registry.clear();
        self.monitor.state.live.store(0, Ordering::Relaxed);
        self.monitor.state.target.store(0, Ordering::Relaxed);

        info!(running = self.monitor.running(), "draining workers");

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        self.report.elapsed = self.started.elapsed();
        info!(
            spawned = self.report.spawned,
            retired = self.report.retired,
            peak_live = self.report.peak_live,
            shortfall = self.report.spawn_shortfall,
            elapsed_ms = self.report.elapsed.as_millis() as u64,
            "ramp finished"
        );

        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgate_core::Stage;
    use parking_lot::Mutex;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    /// Worker that idles until told to stop.
    fn idle_worker(_id: u64, stop: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
        .boxed()
    }

    fn controller(stages: Vec<Stage>, max_workers: u32) -> Arc<RampController> {
        Arc::new(RampController::new(
            RampProfile::new(stages).unwrap(),
            RampSettings {
                tick: Duration::from_millis(100),
                max_workers,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_and_holds_target() {
        let controller = controller(
            vec![
                Stage::ramp(secs(5), 0),
                Stage::ramp(secs(5), 10),
                Stage::hold(secs(2), 10),
            ],
            100,
        );
        let monitor = controller.monitor();
        let cancel = CancellationToken::new();

        let handle = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(idle_worker, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(monitor.live(), 10);
        assert_eq!(monitor.stage(), Some(2));

        let report = handle.await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.spawned, 10);
        assert_eq!(report.retired, 0);
        assert_eq!(report.peak_live, 10);
        assert!(report
            .samples
            .iter()
            .filter(|s| s.elapsed >= secs(10))
            .all(|s| s.live == 10));
        assert_eq!(monitor.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_tracks_interpolated_target() {
        let controller = controller(
            vec![
                Stage::ramp(secs(2), 20),
                Stage::ramp(secs(2), 5),
                Stage::ramp(secs(1), 0),
            ],
            100,
        );

        let report = controller.run(idle_worker, &CancellationToken::new()).await;

        assert!(!report.samples.is_empty());
        for sample in &report.samples {
            assert_eq!(sample.target, controller.profile().target_at(sample.elapsed));
            assert_eq!(sample.live, sample.target, "lag at {:?}", sample.elapsed);
        }
        assert_eq!(report.peak_live, 20);
        assert!(report.retired >= 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retires_longest_running_first() {
        let exited = Arc::new(Mutex::new(Vec::new()));
        let controller = controller(vec![Stage::hold(secs(1), 3), Stage::hold(secs(1), 1)], 10);

        let spawn = {
            let exited = Arc::clone(&exited);
            move |id: u64, stop: CancellationToken| {
                let exited = Arc::clone(&exited);
                async move {
                    stop.cancelled().await;
                    exited.lock().push(id);
                }
                .boxed()
            }
        };

        let cancel = CancellationToken::new();
        let active = controller.drive(spawn, &cancel).await;
        {
            let mut early = exited.lock().clone();
            early.sort_unstable();
            assert_eq!(early, vec![0, 1]);
        }

        let report = active.drain().await;
        assert_eq!(exited.lock().len(), 3);
        assert_eq!(report.retired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_shortfall_degrades() {
        let controller = controller(vec![Stage::hold(secs(2), 5)], 3);

        let report = controller.run(idle_worker, &CancellationToken::new()).await;

        assert_eq!(report.peak_live, 3);
        assert!(report.spawn_shortfall > 0);
        assert!(report.incomplete_stages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_without_capacity_is_incomplete() {
        // A retired worker that ignores its stop signal pins the only permit
        let stubborn = |_id: u64, _stop: CancellationToken| {
            tokio::time::sleep(Duration::from_secs(5)).boxed()
        };
        let controller = controller(
            vec![
                Stage::hold(secs(1), 1),
                Stage::hold(secs(1), 0),
                Stage::hold(secs(1), 1),
            ],
            1,
        );

        let report = controller.run(stubborn, &CancellationToken::new()).await;

        assert_eq!(report.incomplete_stages, vec![2]);
        assert!(!report.is_complete());
        assert_eq!(report.spawned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_and_drains() {
        let controller = controller(vec![Stage::hold(secs(60), 4)], 10);
        let monitor = controller.monitor();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(secs(1)).await;
                cancel.cancel();
            })
        };

        let report = controller.run(idle_worker, &cancel).await;
        canceller.await.unwrap();

        assert!(report.interrupted);
        assert!(report.elapsed < secs(2));
        assert_eq!(monitor.running(), 0);
    }
}
