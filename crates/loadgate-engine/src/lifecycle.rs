//! Run lifecycle: setup once, ramp workers, drain, teardown once
//!
//! ```text
//! Idle -> Setup -> Running -> Draining -> Teardown -> Done
//!           \
//!            -> Aborted   (setup failed or was cancelled)
//! ```

use crate::error::{EngineError, EngineResult, SetupError};
use crate::ramp::{RampController, RampMonitor, RampReport, RampSettings};
use crate::worker::{run_worker, worker_rng, WorkerSettings};
use crate::workload::Workload;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use loadgate_core::{
    CoreResult, LoadConfig, MetricSink, MetricSnapshot, RampProfile, RuleOutcome,
    ThresholdEvaluator, Verdict,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Setup,
    Running,
    Draining,
    Teardown,
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Setup => "setup",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Teardown => "teardown",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Everything a run needs besides the workload and the thresholds.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub profile: RampProfile,
    pub ramp: RampSettings,
    pub worker: WorkerSettings,
    pub seed: u64,
    pub report_interval: Duration,
}

impl RunSettings {
    /// Settings from a validated config; a missing seed is drawn from entropy.
    pub fn from_config(config: &LoadConfig) -> CoreResult<Self> {
        Ok(Self {
            profile: config.ramp_profile()?,
            ramp: RampSettings::from_config(config),
            worker: WorkerSettings::from_config(config),
            seed: config.workload.seed.unwrap_or_else(rand::random),
            report_interval: config.report.interval,
        })
    }
}

/// Final result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: Verdict,
    pub outcomes: Vec<RuleOutcome>,
    pub snapshot: MetricSnapshot,
    pub ramp: RampReport,
    /// Size of the shared pool produced by setup
    pub pool_size: usize,
    pub seed: u64,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Ran to the end of the profile with capacity in every stage.
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.ramp.is_complete()
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }
}

/// Owns one run from setup to verdict.
pub struct LifecycleCoordinator<W: Workload> {
    workload: Arc<W>,
    settings: RunSettings,
    evaluator: ThresholdEvaluator,
    sink: Arc<MetricSink>,
    controller: RampController,
    phase: RwLock<RunPhase>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl<W: Workload> LifecycleCoordinator<W> {
    pub fn new(
        workload: W,
        settings: RunSettings,
        evaluator: ThresholdEvaluator,
        sink: Arc<MetricSink>,
    ) -> Self {
        let controller = RampController::new(settings.profile.clone(), settings.ramp);
        Self {
            workload: Arc::new(workload),
            settings,
            evaluator,
            sink,
            controller,
            phase: RwLock::new(RunPhase::Idle),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.read()
    }

    /// Token that stops the run gracefully when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn monitor(&self) -> RampMonitor {
        self.controller.monitor()
    }

    pub fn sink(&self) -> &Arc<MetricSink> {
        &self.sink
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    fn enter(&self, phase: RunPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        info!(from = %previous, to = %phase, "phase transition");
    }

    /// Execute the run. Can only be called once per coordinator.
    pub async fn run(&self) -> EngineResult<RunReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let started_at = Utc::now();
        info!(seed = self.settings.seed, "starting run");

        self.enter(RunPhase::Setup);
        let setup = tokio::select! {
            result = self.workload.setup() => result,
            _ = self.cancel.cancelled() => Err(SetupError::Cancelled),
        };
        let ctx = match setup {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "setup failed, aborting run");
                self.enter(RunPhase::Aborted);
                return Err(e.into());
            }
        };

        self.enter(RunPhase::Running);
        let progress_stop = self.cancel.child_token();
        let progress = self.spawn_progress(progress_stop.clone());

        let iterations = self.sink.counter("iterations");
        let spawn_worker = {
            let workload = Arc::clone(&self.workload);
            let ctx = ctx.clone();
            let worker = self.settings.worker;
            let seed = self.settings.seed;
            move |id: u64, stop: CancellationToken| {
                run_worker(
                    id,
                    Arc::clone(&workload),
                    ctx.clone(),
                    worker_rng(seed, id),
                    worker,
                    Arc::clone(&iterations),
                    stop,
                )
                .boxed()
            }
        };

        let active = self.controller.drive(spawn_worker, &self.cancel).await;

        self.enter(RunPhase::Draining);
        let ramp = active.drain().await;
        progress_stop.cancel();
        if let Err(e) = progress.await {
            warn!(error = %e, "progress reporter ended abnormally");
        }

        self.enter(RunPhase::Teardown);
        let snapshot = self.sink.snapshot();
        self.workload.teardown(&ctx, &snapshot).await;

        let outcomes = self.evaluator.evaluate(&snapshot);
        let verdict = Verdict::from_outcomes(&outcomes);
        for outcome in outcomes.iter().filter(|o| o.failed()) {
            warn!(
                metric = %outcome.metric,
                condition = %outcome.expression,
                observed = ?outcome.observed,
                "threshold failed"
            );
        }

        let report = RunReport {
            verdict,
            outcomes,
            snapshot,
            interrupted: ramp.interrupted,
            ramp,
            pool_size: ctx.len(),
            seed: self.settings.seed,
            started_at,
            finished_at: Utc::now(),
        };

        self.enter(RunPhase::Done);
        info!(verdict = %report.verdict, complete = report.is_complete(), "run finished");

        Ok(report)
    }

    /// Periodically log progress and currently failing thresholds.
    fn spawn_progress(&self, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let evaluator = self.evaluator.clone();
        let monitor = self.controller.monitor();
        let interval = self.settings.report_interval;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = sink.snapshot();
                let requests = snapshot.count("http_reqs");
                let failed = snapshot.count("http_req_failed");
                let p95_ms = snapshot
                    .trend("http_req_duration")
                    .and_then(|t| t.quantile(0.95))
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .unwrap_or(0.0);
                let error_rate = if requests == 0 {
                    0.0
                } else {
                    failed as f64 / requests as f64
                };

                info!(
                    elapsed_s = start.elapsed().as_secs(),
                    requests,
                    p95_ms = %format!("{:.1}", p95_ms),
                    error_rate = %format!("{:.2}%", error_rate * 100.0),
                    live = monitor.live(),
                    target = monitor.target(),
                    "progress"
                );

                for outcome in evaluator.failing(&snapshot) {
                    warn!(
                        metric = %outcome.metric,
                        condition = %outcome.expression,
                        observed = ?outcome.observed,
                        "threshold currently failing"
                    );
                }
            }
        })
    }
}
