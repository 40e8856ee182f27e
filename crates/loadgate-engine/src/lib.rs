//! Load generation engine: scenario dispatch, worker ramping and the run lifecycle.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod ramp;
pub mod report;
pub mod scenario;
pub mod shortlink;
pub mod target;
pub mod worker;
pub mod workload;

pub use context::SharedContext;
pub use dispatcher::ScenarioDispatcher;
pub use error::{EngineError, EngineResult, SetupError, TargetError};
pub use lifecycle::{LifecycleCoordinator, RunPhase, RunReport, RunSettings};
pub use ramp::{ActiveRamp, RampController, RampMonitor, RampReport, RampSample, RampSettings};
pub use report::{CheckSummary, ReportFormat, RunSummary};
pub use scenario::{Outcome, Scenario};
pub use shortlink::{ShortlinkSettings, ShortlinkWorkload};
pub use target::{HttpTarget, MockBehavior, MockTarget, TargetClient, TargetResponse};
pub use worker::{run_worker, worker_rng, WorkerSettings};
pub use workload::Workload;

use loadgate_core::{LoadConfig, MetricSink};
use std::sync::Arc;

/// Wire a shortener run from a validated config.
pub fn shortlink_coordinator(
    config: &LoadConfig,
    target: Arc<dyn TargetClient>,
) -> EngineResult<LifecycleCoordinator<ShortlinkWorkload>> {
    let sink = Arc::new(MetricSink::new());
    let workload =
        ShortlinkWorkload::new(target, &sink, ShortlinkSettings::from_config(config))?;
    let settings = RunSettings::from_config(config)?;
    let evaluator = config.threshold_evaluator()?;

    Ok(LifecycleCoordinator::new(workload, settings, evaluator, sink))
}
