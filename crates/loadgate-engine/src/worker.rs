//! Virtual worker loop

use crate::context::SharedContext;
use crate::workload::Workload;
use loadgate_core::{Counter, LoadConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Think-time bounds between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub think_time_min: Duration,
    pub think_time_max: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            think_time_min: config.workload.think_time_min,
            think_time_max: config.workload.think_time_max,
        }
    }

    /// Uniform think time in `[min, max]`.
    pub fn think_time<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.think_time_max <= self.think_time_min {
            return self.think_time_min;
        }
        let spread = (self.think_time_max - self.think_time_min).as_secs_f64();
        self.think_time_min + Duration::from_secs_f64(rng.gen::<f64>() * spread)
    }
}

/// Private RNG of worker `id` for a run seeded with `seed`.
pub fn worker_rng(seed: u64, id: u64) -> StdRng {
    // splitmix64 step so neighbouring ids get unrelated streams
    let mut z = seed ^ id.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}

/// Iterate until `stop` fires: run one scenario, then think.
///
/// Stop is observed between iterations and interrupts the think time; an
/// in-flight request is never cancelled.
pub async fn run_worker<W: Workload + ?Sized>(
    id: u64,
    workload: Arc<W>,
    ctx: SharedContext,
    mut rng: StdRng,
    settings: WorkerSettings,
    iterations: Arc<Counter>,
    stop: CancellationToken,
) {
    tracing::trace!(worker = id, "worker started");

    while !stop.is_cancelled() {
        workload.dispatcher().select_and_run(&ctx, &mut rng).await;
        iterations.increment();

        let think = settings.think_time(&mut rng);
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(think) => {}
        }
    }

    tracing::trace!(worker = id, "worker stopped");
}
