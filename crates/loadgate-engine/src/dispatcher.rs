//! Weighted scenario selection and execution

use crate::context::SharedContext;
use crate::scenario::{Outcome, Scenario};
use futures::FutureExt;
use loadgate_core::{CoreResult, Counter, MetricSink, WeightTable};
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Picks and runs one scenario per iteration.
pub struct ScenarioDispatcher {
    table: WeightTable<Arc<dyn Scenario>>,
    iteration_panics: Arc<Counter>,
    iterations_failed: Arc<Counter>,
}

impl ScenarioDispatcher {
    /// Register scenarios with weights summing to 1.0.
    pub fn new(scenarios: Vec<(f64, Arc<dyn Scenario>)>, sink: &MetricSink) -> CoreResult<Self> {
        Ok(Self {
            table: WeightTable::new(scenarios)?,
            iteration_panics: sink.counter("iteration_panics"),
            iterations_failed: sink.counter("iterations_failed"),
        })
    }

    /// Scenario owning `draw` in `[0, 1)`.
    pub fn select(&self, draw: f64) -> &Arc<dyn Scenario> {
        self.table.select(draw)
    }

    /// Registered scenario names and weights, in order.
    pub fn scenarios(&self) -> impl Iterator<Item = (&str, f64)> {
        self.table.iter().map(|(w, s)| (s.name(), w))
    }

    /// Draw from `rng`, run the selected scenario and return its outcome.
    ///
    /// A panicking scenario is reported as [`Outcome::Failed`].
    pub async fn select_and_run(&self, ctx: &SharedContext, rng: &mut StdRng) -> Outcome {
        let draw: f64 = rng.gen();
        let scenario = Arc::clone(self.select(draw));

        let outcome = match AssertUnwindSafe(scenario.run(ctx, rng)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.iteration_panics.increment();
                let message = panic_message(payload.as_ref());
                tracing::warn!(scenario = scenario.name(), panic = %message, "scenario panicked");
                Outcome::Failed(format!("scenario `{}` panicked: {}", scenario.name(), message))
            }
        };

        if outcome.is_failed() {
            self.iterations_failed.increment();
        }

        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
