//! A workload ties together setup, the scenario mix and teardown

use crate::context::SharedContext;
use crate::dispatcher::ScenarioDispatcher;
use crate::error::SetupError;
use async_trait::async_trait;
use loadgate_core::MetricSnapshot;

/// Everything the lifecycle coordinator needs from a workload.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Runs once before any worker; produces the shared context.
    async fn setup(&self) -> Result<SharedContext, SetupError>;

    /// Scenario mix used by every worker iteration.
    fn dispatcher(&self) -> &ScenarioDispatcher;

    /// Runs once after all workers have exited.
    async fn teardown(&self, ctx: &SharedContext, snapshot: &MetricSnapshot);
}
