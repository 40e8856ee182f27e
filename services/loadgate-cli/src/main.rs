use anyhow::{anyhow, Context};
use clap::Parser;
use loadgate_core::LoadConfig;
use loadgate_engine::{
    shortlink_coordinator, EngineError, HttpTarget, MockTarget, ReportFormat, RunReport,
    RunSummary, TargetClient,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_PASS: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_SETUP_ABORTED: u8 = 97;
const EXIT_INCOMPLETE: u8 = 98;
const EXIT_THRESHOLDS_FAILED: u8 = 99;

/// Latency of the in-memory target used by `--dry-run`.
const DRY_RUN_LATENCY: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(name = "loadgate")]
#[command(about = "Ramped load generation with SLO threshold verification", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in preset (baseline, stress)
    #[arg(long)]
    preset: Option<String>,

    /// Base URL of the shortener under test
    #[arg(long)]
    base_url: Option<String>,

    /// Seed for scenario selection and think times
    #[arg(long)]
    seed: Option<u64>,

    /// Write a report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Report format (markdown, json)
    #[arg(long, default_value = "markdown")]
    format: ReportFormat,

    /// Run against an in-memory target instead of HTTP
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Name shown in the summary and report title.
    fn run_name(&self) -> String {
        if let Some(path) = &self.config {
            return path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom".to_string());
        }
        self.preset.clone().unwrap_or_else(|| "baseline".to_string())
    }

    /// Config file or preset, then environment, then flags, then validation.
    fn load_config(&self) -> anyhow::Result<LoadConfig> {
        let mut config = match (&self.config, &self.preset) {
            (Some(path), _) => LoadConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            (None, Some(name)) => LoadConfig::preset(name)?,
            (None, None) => LoadConfig::baseline(),
        };

        config.apply_env_overrides();

        if let Some(url) = &self.base_url {
            config.target.base_url = url.clone();
        }
        if let Some(seed) = self.seed {
            config.workload.seed = Some(seed);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level `{}`", level))?,
    };

    let builder = fmt().with_env_filter(env_filter).with_target(false);
    let result = if format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow!("failed to initialize logging: {}", e))
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Received SIGINT (Ctrl+C), draining workers..."),
        _ = terminate => info!("🛑 Received SIGTERM, draining workers..."),
    }
}

/// Exit status for a finished run.
fn exit_code_for(report: &RunReport) -> u8 {
    if !report.passed() {
        EXIT_THRESHOLDS_FAILED
    } else if !report.is_complete() {
        EXIT_INCOMPLETE
    } else {
        EXIT_PASS
    }
}

async fn run(cli: &Cli, config: &LoadConfig) -> anyhow::Result<u8> {
    let target: Arc<dyn TargetClient> = if cli.dry_run {
        info!("dry run: using the in-memory target");
        Arc::new(MockTarget::new().with_latency(DRY_RUN_LATENCY))
    } else {
        Arc::new(HttpTarget::new(
            &config.target.base_url,
            config.target.request_timeout,
        )?)
    };

    let coordinator = shortlink_coordinator(config, target)?;

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    info!(
        base_url = %config.target.base_url,
        stages = config.profile.stages.len(),
        pool_size = config.workload.pool_size,
        "🚀 Starting load test"
    );

    let report = match coordinator.run().await {
        Ok(report) => report,
        Err(EngineError::SetupAborted(e)) => {
            error!(error = %e, "setup aborted");
            eprintln!("❌ Setup aborted: {}", e);
            return Ok(EXIT_SETUP_ABORTED);
        }
        Err(e) => return Err(e.into()),
    };

    let summary = RunSummary::new(cli.run_name(), &report);
    println!("{}", summary.console_text());

    if let Some(path) = &cli.report {
        summary
            .write_report(path, cli.format)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(exit_code_for(&report))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(e) = init_logging(&config.logging.level, &config.logging.format) {
        eprintln!("❌ {:#}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(&cli, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "load test failed");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loadgate_core::{MetricSnapshot, Verdict};
    use loadgate_engine::RampReport;

    fn report(verdict: Verdict, interrupted: bool) -> RunReport {
        RunReport {
            verdict,
            outcomes: Vec::new(),
            snapshot: MetricSnapshot::default(),
            ramp: RampReport::default(),
            pool_size: 1,
            seed: 1,
            interrupted,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&report(Verdict::Pass, false)), EXIT_PASS);
        assert_eq!(exit_code_for(&report(Verdict::Fail, false)), EXIT_THRESHOLDS_FAILED);
        assert_eq!(exit_code_for(&report(Verdict::Pass, true)), EXIT_INCOMPLETE);
        assert_eq!(exit_code_for(&report(Verdict::Fail, true)), EXIT_THRESHOLDS_FAILED);
    }

    #[test]
    fn test_flags_override_preset() {
        let cli = Cli::try_parse_from([
            "loadgate",
            "--preset",
            "stress",
            "--base-url",
            "https://staging.example.com",
            "--seed",
            "42",
            "--format",
            "json",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.target.base_url, "https://staging.example.com");
        assert_eq!(config.workload.seed, Some(42));
        assert_eq!(config.workload.pool_size, 20);
        assert_eq!(cli.format, ReportFormat::Json);
        assert_eq!(cli.run_name(), "stress");
    }

    #[test]
    fn test_config_and_preset_conflict() {
        let parsed = Cli::try_parse_from(["loadgate", "--config", "a.toml", "--preset", "stress"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let cli = Cli::try_parse_from(["loadgate", "--base-url", "localhost:4000"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_unknown_preset() {
        let cli = Cli::try_parse_from(["loadgate", "--preset", "soak"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}
