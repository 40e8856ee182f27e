//! Core types for loadgate: ramp profiles, metrics, thresholds and run configuration.

pub mod config;
pub mod duration;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod threshold;
pub mod weights;

pub use config::{ConfigError, LoadConfig, ThresholdConfig, WeightsConfig};
pub use duration::{format_duration, parse_duration};
pub use error::{CoreError, CoreResult};
pub use metrics::{Counter, MetricSink, MetricSnapshot, Trend, TrendSnapshot, TrendStats};
pub use profile::{RampProfile, Stage, StagePosition, StageShape};
pub use threshold::{
    Comparison, MetricKind, RuleKind, RuleOutcome, RuleStatus, ThresholdEvaluator, ThresholdRule,
    TrendAggregate, Verdict,
};
pub use weights::WeightTable;
