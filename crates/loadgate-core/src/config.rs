//! Run configuration.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables
//! 3. TOML configuration file or built-in preset
//! 4. Default values (the `baseline` preset)

use crate::duration::serde_str;
use crate::error::CoreError;
use crate::profile::{RampProfile, Stage};
use crate::threshold::{ThresholdEvaluator, ThresholdRule};
use crate::weights::WeightTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Names accepted by [`LoadConfig::preset`].
pub const PRESETS: [&str; 2] = ["baseline", "stress"];

/// Complete description of one load-test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Service under test
    #[serde(default)]
    pub target: TargetConfig,

    /// Concurrency ramp
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Setup pool, scenario mix and think time
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Pass/fail rules
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic progress reporting
    #[serde(default)]
    pub report: ReportConfig,
}

/// Target service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the shortener (default: "http://localhost:4000")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30s)
    #[serde(default = "default_request_timeout", with = "serde_str")]
    pub request_timeout: Duration,
}

/// Ramp profile configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Scheduling tick of the ramp controller (default: 100ms)
    #[serde(default = "default_tick", with = "serde_str")]
    pub tick: Duration,

    /// Upper bound on concurrently live workers (default: 10000)
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Concurrency the first ramp stage starts from (default: 0)
    #[serde(default)]
    pub start_target: u32,

    /// Ordered stages
    #[serde(default = "baseline_stages")]
    pub stages: Vec<Stage>,
}

/// Workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Links created during setup (default: 10)
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pause between setup creates (default: 200ms)
    #[serde(default = "default_setup_pause", with = "serde_str")]
    pub setup_pause: Duration,

    /// Lower bound of per-iteration think time (default: 1s)
    #[serde(default = "default_think_time_min", with = "serde_str")]
    pub think_time_min: Duration,

    /// Upper bound of per-iteration think time (default: 4s)
    #[serde(default = "default_think_time_max", with = "serde_str")]
    pub think_time_max: Duration,

    /// Run seed; drawn from entropy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Scenario weights
    #[serde(default)]
    pub weights: WeightsConfig,
}

/// Scenario weight table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub create: f64,
    pub redirect: f64,
    pub not_found: f64,
}

/// One threshold rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Metric the rule reads
    pub metric: String,

    /// Condition such as `p(95)<500`, `rate<0.01` or `count>0`
    pub condition: String,

    /// Complement counter of a `rate` rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_with: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json, pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Progress reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// How often progress and thresholds are logged during the run (default: 10s)
    #[serde(default = "default_report_interval", with = "serde_str")]
    pub interval: Duration,
}

fn default_base_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_tick() -> Duration {
    Duration::from_millis(100)
}

fn default_max_workers() -> u32 {
    10_000
}

fn default_pool_size() -> u32 {
    10
}

fn default_setup_pause() -> Duration {
    Duration::from_millis(200)
}

fn default_think_time_min() -> Duration {
    Duration::from_secs(1)
}

fn default_think_time_max() -> Duration {
    Duration::from_secs(4)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn baseline_stages() -> Vec<Stage> {
    vec![
        Stage::ramp(secs(30), 5),
        Stage::ramp(secs(120), 10),
        Stage::ramp(secs(180), 10),
        Stage::ramp(secs(60), 20),
        Stage::ramp(secs(60), 20),
        Stage::ramp(secs(30), 0),
    ]
}

fn stress_stages() -> Vec<Stage> {
    vec![
        Stage::ramp(secs(120), 100),
        Stage::ramp(secs(180), 500),
        Stage::ramp(secs(180), 1000),
        Stage::ramp(secs(180), 2000),
        Stage::ramp(secs(180), 5000),
        Stage::ramp(secs(120), 0),
    ]
}

fn standard_thresholds(p95_ms: u32, p99_ms: u32) -> Vec<ThresholdConfig> {
    let rule = |metric: &str, condition: String, paired_with: Option<&str>| ThresholdConfig {
        metric: metric.to_string(),
        condition,
        paired_with: paired_with.map(str::to_string),
    };

    vec![
        rule("http_req_duration", format!("p(95)<{}", p95_ms), None),
        rule("http_req_duration", format!("p(99)<{}", p99_ms), None),
        rule("http_req_failed", "rate<0.01".to_string(), Some("http_req_ok")),
        rule("created_links", "count>0".to_string(), None),
        rule("successful_redirects", "count>0".to_string(), None),
    ]
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            max_workers: default_max_workers(),
            start_target: 0,
            stages: baseline_stages(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            setup_pause: default_setup_pause(),
            think_time_min: default_think_time_min(),
            think_time_max: default_think_time_max(),
            seed: None,
            weights: WeightsConfig::default(),
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            create: 0.15,
            redirect: 0.80,
            not_found: 0.05,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval: default_report_interval(),
        }
    }
}

impl LoadConfig {
    /// Steady, low-concurrency run against tight latency targets.
    pub fn baseline() -> Self {
        Self {
            target: TargetConfig::default(),
            profile: ProfileConfig::default(),
            workload: WorkloadConfig::default(),
            thresholds: standard_thresholds(200, 500),
            logging: LoggingConfig::default(),
            report: ReportConfig::default(),
        }
    }

    /// Ramp to 5000 workers against relaxed latency targets.
    pub fn stress() -> Self {
        Self {
            target: TargetConfig::default(),
            profile: ProfileConfig {
                stages: stress_stages(),
                ..ProfileConfig::default()
            },
            workload: WorkloadConfig {
                pool_size: 20,
                setup_pause: Duration::from_millis(100),
                think_time_min: Duration::ZERO,
                think_time_max: secs(2),
                seed: None,
                weights: WeightsConfig {
                    create: 0.20,
                    redirect: 0.75,
                    not_found: 0.05,
                },
            },
            thresholds: standard_thresholds(500, 1000),
            logging: LoggingConfig::default(),
            report: ReportConfig::default(),
        }
    }

    /// Built-in preset by name.
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "stress" => Ok(Self::stress()),
            other => Err(ConfigError::ValidationError(format!(
                "unknown preset `{}`, expected one of: {}",
                other,
                PRESETS.join(", ")
            ))),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file doesn't exist or has invalid TOML syntax.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError { path, source: e })
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `LOADGATE_BASE_URL` (or `BASE_URL`) - Target base URL
    /// - `LOADGATE_LOG_LEVEL` - Log level
    /// - `LOADGATE_LOG_FORMAT` - Log format
    /// - `LOADGATE_SEED` - Run seed
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup` (environment variable semantics).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LOADGATE_BASE_URL").or_else(|| lookup("BASE_URL")) {
            self.target.base_url = url;
        }

        if let Some(level) = lookup("LOADGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("LOADGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(seed) = lookup("LOADGATE_SEED") {
            if let Ok(seed) = seed.parse() {
                self.workload.seed = Some(seed);
            } else {
                tracing::warn!(value = %seed, "ignoring LOADGATE_SEED: not an unsigned integer");
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.target.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(
                "target.base_url must be an http:// or https:// URL".to_string(),
            ));
        }

        if self.target.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "target.request_timeout must be positive".to_string(),
            ));
        }

        if self.profile.tick.is_zero() {
            return Err(ConfigError::ValidationError(
                "profile.tick must be positive".to_string(),
            ));
        }

        if self.profile.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "profile.max_workers must be non-zero".to_string(),
            ));
        }

        self.ramp_profile()?;

        if self.workload.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "workload.pool_size must be non-zero".to_string(),
            ));
        }

        if self.workload.think_time_min > self.workload.think_time_max {
            return Err(ConfigError::ValidationError(
                "workload.think_time_min must not exceed workload.think_time_max".to_string(),
            ));
        }

        let weights = &self.workload.weights;
        WeightTable::new(vec![
            (weights.create, ()),
            (weights.redirect, ()),
            (weights.not_found, ()),
        ])?;

        self.threshold_rules()?;

        if self.report.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "report.interval must be positive".to_string(),
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        // Validate log format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Build the ramp profile described by `[profile]`.
    pub fn ramp_profile(&self) -> Result<RampProfile, CoreError> {
        RampProfile::with_start_target(self.profile.stages.clone(), self.profile.start_target)
    }

    /// Parse every `[[thresholds]]` entry.
    pub fn threshold_rules(&self) -> Result<Vec<ThresholdRule>, CoreError> {
        self.thresholds
            .iter()
            .map(|t| ThresholdRule::parse(&t.metric, &t.condition, t.paired_with.as_deref()))
            .collect()
    }

    /// Evaluator over the configured rules.
    pub fn threshold_evaluator(&self) -> Result<ThresholdEvaluator, CoreError> {
        Ok(ThresholdEvaluator::new(self.threshold_rules()?))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file
    #[error("Failed to read config file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Profile, weight or threshold definition rejected
    #[error("Configuration validation failed: {0}")]
    Core(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::StageShape;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LoadConfig::default();

        assert_eq!(config.target.base_url, "http://localhost:4000");
        assert_eq!(config.target.request_timeout, Duration::from_secs(30));
        assert_eq!(config.profile.tick, Duration::from_millis(100));
        assert_eq!(config.workload.pool_size, 10);
        assert_eq!(config.thresholds.len(), 5);
    }

    #[test]
    fn test_presets_are_valid() {
        for name in PRESETS {
            let config = LoadConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "preset {} invalid", name);
        }
        assert!(LoadConfig::preset("soak").is_err());
    }

    #[test]
    fn test_stress_preset() {
        let config = LoadConfig::stress();
        let profile = config.ramp_profile().unwrap();

        assert_eq!(profile.max_target(), 5000);
        assert_eq!(profile.total_duration(), Duration::from_secs(16 * 60));
        assert_eq!(config.workload.pool_size, 20);
        assert_eq!(config.workload.weights.create, 0.20);
        assert_eq!(config.thresholds[0].condition, "p(95)<500");
    }

    #[test]
    fn test_baseline_preset() {
        let profile = LoadConfig::baseline().ramp_profile().unwrap();
        assert_eq!(profile.max_target(), 20);
        assert_eq!(profile.total_duration(), Duration::from_secs(9 * 60));
        assert_eq!(profile.target_at(Duration::from_secs(15)), 3);
    }

    #[test]
    fn test_config_validation_bad_weights() {
        let mut config = LoadConfig::default();
        config.workload.weights.not_found = 0.5;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("weights sum to"));
    }

    #[test]
    fn test_config_validation_think_time() {
        let mut config = LoadConfig::default();
        config.workload.think_time_min = Duration::from_secs(5);

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("think_time_min must not exceed"));
    }

    #[test]
    fn test_config_validation_rate_needs_pair() {
        let mut config = LoadConfig::default();
        config.thresholds[2].paired_with = None;

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("paired_with"));
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = LoadConfig::default();
        config.logging.level = "invalid".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("logging.level must be"));
    }

    #[test]
    fn test_config_validation_base_url() {
        let mut config = LoadConfig::default();
        config.target.base_url = "localhost:4000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = LoadConfig::stress();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("p(99)<1000"));

        let parsed: LoadConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile.stages, config.profile.stages);
        assert_eq!(parsed.thresholds, config.thresholds);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            [target]
            base_url = "http://127.0.0.1:8080"

            [profile]
            tick = "50ms"
            stages = [
              { duration = "5s", target = 0 },
              { duration = "5s", target = 10, shape = "hold" },
            ]

            [workload]
            pool_size = 5
            think_time_min = "0s"
            think_time_max = "100ms"
            seed = 7

            [workload.weights]
            create = 0.2
            redirect = 0.75
            not_found = 0.05

            [[thresholds]]
            metric = "created_links"
            condition = "count>0"
        "#;

        let config: LoadConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.target.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.target.request_timeout, Duration::from_secs(30));
        assert_eq!(config.profile.tick, Duration::from_millis(50));
        assert_eq!(config.profile.stages[1].shape, StageShape::Hold);
        assert_eq!(config.workload.seed, Some(7));
        assert_eq!(config.workload.think_time_max, Duration::from_millis(100));
        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_file_parses() {
        let config: LoadConfig =
            toml::from_str(include_str!("../../../config/loadgate.example.toml")).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[workload]\npool_size = 3\n").unwrap();

        let config = LoadConfig::from_file(&path).unwrap();
        assert_eq!(config.workload.pool_size, 3);

        let missing = LoadConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::IoError { .. })));

        std::fs::write(&path, "[workload\n").unwrap();
        assert!(matches!(
            LoadConfig::from_file(&path),
            Err(ConfigError::TomlError { .. })
        ));
    }

    #[test]
    fn test_env_override() {
        let env: HashMap<&str, &str> = [
            ("BASE_URL", "http://legacy:4000"),
            ("LOADGATE_LOG_FORMAT", "json"),
            ("LOADGATE_SEED", "42"),
        ]
        .into_iter()
        .collect();

        let mut config = LoadConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.target.base_url, "http://legacy:4000");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.workload.seed, Some(42));
    }

    #[test]
    fn test_env_override_prefers_prefixed_url() {
        let mut config = LoadConfig::default();
        config.apply_overrides_from(|key| match key {
            "LOADGATE_BASE_URL" => Some("http://new:1".to_string()),
            "BASE_URL" => Some("http://old:1".to_string()),
            _ => None,
        });
        assert_eq!(config.target.base_url, "http://new:1");
    }
}
