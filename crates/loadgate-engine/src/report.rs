//! Report generation for load test runs

use crate::lifecycle::RunReport;
use loadgate_core::{format_duration, RuleOutcome, RuleStatus, TrendStats};
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Trends listed in the latency table, in order.
const REPORTED_TRENDS: [&str; 3] = ["http_req_duration", "create_link_duration", "redirect_duration"];

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format `{}` (markdown, json)", other)),
        }
    }
}

/// Pass/fail count of one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub label: String,
    pub passed: u64,
    pub failed: u64,
}

/// Human-facing view of a [`RunReport`].
pub struct RunSummary<'a> {
    name: String,
    report: &'a RunReport,
}

impl<'a> RunSummary<'a> {
    pub fn new(name: impl Into<String>, report: &'a RunReport) -> Self {
        Self {
            name: name.into(),
            report,
        }
    }

    /// Verdict passed and the run was complete.
    pub fn passes(&self) -> bool {
        self.report.passed() && self.report.is_complete()
    }

    /// Get failure summary
    pub fn failure_summary(&self) -> String {
        let failures = self.failures();
        if failures.is_empty() {
            return "All thresholds passed".to_string();
        }

        failures.join("\n")
    }

    fn failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self
            .report
            .outcomes
            .iter()
            .filter(|o| o.failed())
            .map(|o| format!("{}: {} (observed {})", o.metric, o.expression, observed(o)))
            .collect();

        if self.report.interrupted {
            failures.push("Run was interrupted before the profile ended".to_string());
        }
        for stage in &self.report.ramp.incomplete_stages {
            failures.push(format!("Stage {} ran without any live worker", stage));
        }

        failures
    }

    /// Named checks with their pass/fail counts, sorted by label.
    pub fn checks(&self) -> Vec<CheckSummary> {
        let mut checks: Vec<CheckSummary> = Vec::new();
        for (name, value) in self.report.snapshot.counters_with_prefix("check:") {
            let Some((label, result)) = name["check:".len()..].rsplit_once(':') else {
                continue;
            };
            let index = match checks.iter().position(|c| c.label == label) {
                Some(index) => index,
                None => {
                    checks.push(CheckSummary {
                        label: label.to_string(),
                        passed: 0,
                        failed: 0,
                    });
                    checks.len() - 1
                }
            };
            match result {
                "pass" => checks[index].passed += value,
                "fail" => checks[index].failed += value,
                _ => {}
            }
        }
        checks.sort_by(|a, b| a.label.cmp(&b.label));
        checks
    }

    fn trend_stats(&self) -> Vec<(&'static str, TrendStats)> {
        REPORTED_TRENDS
            .iter()
            .filter_map(|name| {
                self.report
                    .snapshot
                    .trend(name)
                    .filter(|t| !t.is_empty())
                    .map(|t| (*name, t.stats()))
            })
            .collect()
    }

    fn count(&self, name: &str) -> u64 {
        self.report.snapshot.count(name)
    }

    fn error_rate(&self) -> f64 {
        let requests = self.count("http_reqs");
        if requests == 0 {
            0.0
        } else {
            self.count("http_req_failed") as f64 / requests as f64
        }
    }

    fn duration_secs(&self) -> f64 {
        (self.report.finished_at - self.report.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Plain-text summary for the console.
    pub fn console_text(&self) -> String {
        let mut out = String::new();
        let status = if self.passes() { "✅ PASSED" } else { "❌ FAILED" };

        let _ = writeln!(out, "=================================");
        let _ = writeln!(out, "{}: {}", self.name, status);
        let _ = writeln!(out, "=================================");
        let _ = writeln!(out, "  Duration:             {:.1}s", self.duration_secs());
        let _ = writeln!(out, "  Short codes in pool:  {}", self.report.pool_size);
        let _ = writeln!(out, "  Created links:        {}", self.count("created_links"));
        let _ = writeln!(out, "  Successful redirects: {}", self.count("successful_redirects"));
        let _ = writeln!(out, "  Not-found pages:      {}", self.count("not_found_errors"));
        let _ = writeln!(out, "  Requests:             {}", self.count("http_reqs"));
        let _ = writeln!(out, "  Error rate:           {:.2}%", self.error_rate() * 100.0);
        let _ = writeln!(out, "  Iterations:           {}", self.count("iterations"));
        let _ = writeln!(
            out,
            "  Workers:              peak {} (spawned {}, retired {}, shortfall {})",
            self.report.ramp.peak_live,
            self.report.ramp.spawned,
            self.report.ramp.retired,
            self.report.ramp.spawn_shortfall
        );

        let trends = self.trend_stats();
        if !trends.is_empty() {
            let _ = writeln!(out);
            for (name, stats) in trends {
                let _ = writeln!(
                    out,
                    "  {:<22} avg={:.2}ms med={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
                    name, stats.avg_ms, stats.med_ms, stats.p95_ms, stats.p99_ms, stats.max_ms
                );
            }
        }

        let checks = self.checks();
        if !checks.is_empty() {
            let _ = writeln!(out);
            for check in checks {
                let mark = if check.failed == 0 { "✓" } else { "✗" };
                let _ = writeln!(
                    out,
                    "  {} {} ({} passed, {} failed)",
                    mark, check.label, check.passed, check.failed
                );
            }
        }

        if !self.report.outcomes.is_empty() {
            let _ = writeln!(out);
            for outcome in &self.report.outcomes {
                let _ = writeln!(
                    out,
                    "  {} {}: {} (observed {})",
                    status_mark(outcome.status),
                    outcome.metric,
                    outcome.expression,
                    observed(outcome)
                );
            }
        }

        out
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> std::io::Result<()> {
        let content = match format {
            ReportFormat::Markdown => self.generate_markdown(),
            ReportFormat::Json => self.generate_json(),
        };

        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Generate Markdown report
    pub fn generate_markdown(&self) -> String {
        let pass_emoji = if self.passes() { "✅" } else { "❌" };

        let mut latency = String::new();
        for (name, stats) in self.trend_stats() {
            let _ = writeln!(
                latency,
                "| {} | {} | {:.2}ms | {:.2}ms | {:.2}ms | {:.2}ms | {:.2}ms |",
                name, stats.count, stats.avg_ms, stats.med_ms, stats.p95_ms, stats.p99_ms, stats.max_ms
            );
        }
        if latency.is_empty() {
            latency.push_str("| - | 0 | - | - | - | - | - |\n");
        }

        let mut thresholds = String::new();
        for outcome in &self.report.outcomes {
            let _ = writeln!(
                thresholds,
                "| {} | `{}` | {} | {} |",
                outcome.metric,
                outcome.expression,
                observed(outcome),
                status_mark(outcome.status)
            );
        }
        if thresholds.is_empty() {
            thresholds.push_str("| - | - | - | - |\n");
        }

        let mut checks = String::new();
        for check in self.checks() {
            let _ = writeln!(
                checks,
                "| {} | {} | {} |",
                check.label, check.passed, check.failed
            );
        }
        if checks.is_empty() {
            checks.push_str("| - | 0 | 0 |\n");
        }

        let ramp = &self.report.ramp;

        format!(
            r#"# Load Test Report: {}

**Status**: {} {}

---

## Summary

- **Duration**: {:.1} seconds
- **Seed**: {}
- **Short codes in pool**: {}
- **Created links**: {}
- **Successful redirects**: {}
- **Not-found pages**: {}
- **Total Requests**: {}
- **Failed Requests**: {}
- **Error Rate**: {:.4}%
- **Iterations**: {}

---

## Latency

| Trend | Count | Avg | Median | P95 | P99 | Max |
|-------|-------|-----|--------|-----|-----|-----|
{}
---

## Thresholds

| Metric | Condition | Observed | Status |
|--------|-----------|----------|--------|
{}
---

## Checks

| Check | Passed | Failed |
|-------|--------|--------|
{}
---

## Workers

- **Peak live**: {}
- **Spawned**: {}
- **Retired**: {}
- **Spawn shortfall**: {}
- **Incomplete stages**: {}
- **Interrupted**: {}

---

## Result

{}

---

**Report Generated**: {}
"#,
            self.name,
            pass_emoji,
            if self.passes() { "PASSED" } else { "FAILED" },
            self.duration_secs(),
            self.report.seed,
            self.report.pool_size,
            self.count("created_links"),
            self.count("successful_redirects"),
            self.count("not_found_errors"),
            self.count("http_reqs"),
            self.count("http_req_failed"),
            self.error_rate() * 100.0,
            self.count("iterations"),
            latency,
            thresholds,
            checks,
            ramp.peak_live,
            ramp.spawned,
            ramp.retired,
            ramp.spawn_shortfall,
            if ramp.incomplete_stages.is_empty() {
                "none".to_string()
            } else {
                format!("{:?}", ramp.incomplete_stages)
            },
            if self.report.interrupted { "yes" } else { "no" },
            if self.passes() {
                "✅ **All thresholds passed**".to_string()
            } else {
                format!("❌ **Failed**:\n\n{}", self.failure_summary())
            },
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Generate JSON report
    pub fn generate_json(&self) -> String {
        let trends: serde_json::Map<String, serde_json::Value> = self
            .trend_stats()
            .into_iter()
            .map(|(name, stats)| (name.to_string(), serde_json::json!(stats)))
            .collect();

        let checks: Vec<serde_json::Value> = self
            .checks()
            .into_iter()
            .map(|c| serde_json::json!({ "label": c.label, "passed": c.passed, "failed": c.failed }))
            .collect();

        let ramp = &self.report.ramp;
        let samples: Vec<serde_json::Value> = ramp
            .samples
            .iter()
            .map(|s| {
                serde_json::json!({
                    "elapsed_ms": s.elapsed.as_millis() as u64,
                    "target": s.target,
                    "live": s.live,
                })
            })
            .collect();

        serde_json::json!({
            "scenario": self.name,
            "status": if self.passes() { "passed" } else { "failed" },
            "verdict": self.report.verdict,
            "complete": self.report.is_complete(),
            "interrupted": self.report.interrupted,
            "seed": self.report.seed,
            "started_at": self.report.started_at.to_rfc3339(),
            "finished_at": self.report.finished_at.to_rfc3339(),
            "duration_seconds": self.duration_secs(),
            "pool_size": self.report.pool_size,
            "counts": {
                "created_links": self.count("created_links"),
                "successful_redirects": self.count("successful_redirects"),
                "not_found_errors": self.count("not_found_errors"),
                "http_reqs": self.count("http_reqs"),
                "http_req_failed": self.count("http_req_failed"),
                "iterations": self.count("iterations"),
                "iteration_panics": self.count("iteration_panics"),
            },
            "error_rate": self.error_rate(),
            "trends_ms": trends,
            "checks": checks,
            "thresholds": self.report.outcomes,
            "ramp": {
                "peak_live": ramp.peak_live,
                "spawned": ramp.spawned,
                "retired": ramp.retired,
                "spawn_shortfall": ramp.spawn_shortfall,
                "incomplete_stages": ramp.incomplete_stages,
                "elapsed": format_duration(ramp.elapsed),
                "samples": samples,
            },
            "failures": self.failures(),
        })
        .to_string()
    }
}

fn status_mark(status: RuleStatus) -> &'static str {
    match status {
        RuleStatus::Pass => "✅",
        RuleStatus::Fail => "❌",
        RuleStatus::Indeterminate => "⚪",
    }
}

fn observed(outcome: &RuleOutcome) -> String {
    match outcome.observed {
        Some(value) => format!("{:.4}", value),
        None => "n/a".to_string(),
    }
}
