//! Scenario abstraction: one weighted unit of behavior per iteration

use crate::context::SharedContext;
use async_trait::async_trait;
use rand::rngs::StdRng;
use std::fmt;

/// Result of one scenario execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(String),
    /// Nothing to do (e.g. empty redirect pool)
    Skipped(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed(reason) => write!(f, "failed: {}", reason),
            Outcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// A selectable behavior.
///
/// Implementations record their own metrics and must not panic on failed
/// assertions; a panic is still caught by the dispatcher.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &str;

    /// Execute once against the shared context using the worker's RNG.
    async fn run(&self, ctx: &SharedContext, rng: &mut StdRng) -> Outcome;
}
