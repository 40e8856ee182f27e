//! Declarative pass/fail rules over aggregated metrics
//!
//! A rule is declared on a metric name with a condition expression:
//!
//! | Expression      | Metric kind | Observed value                              |
//! |-----------------|-------------|---------------------------------------------|
//! | `p(95)<500`     | Trend       | 95th percentile, milliseconds                |
//! | `avg<=200`      | Trend       | mean (`min`, `max`, `med` work the same way) |
//! | `rate<0.01`     | Counter     | `metric / (metric + paired_with)`           |
//! | `count>0`       | Counter     | counter value (missing counters read as 0)  |
//!
//! Supported operators are `<`, `<=`, `>`, `>=`, `==` and `!=`.

use crate::error::{CoreError, CoreResult};
use crate::metrics::{MetricSnapshot, TrendSnapshot};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Comparison operator of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Operators ordered so that two-character forms are tried first.
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// Aggregate of a trend a rule compares against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendAggregate {
    /// Percentile in `[0, 100]`
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
}

impl TrendAggregate {
    fn observe(self, trend: &TrendSnapshot) -> Option<Duration> {
        match self {
            TrendAggregate::Percentile(p) => trend.quantile(p / 100.0),
            TrendAggregate::Avg => trend.mean(),
            TrendAggregate::Min => trend.min(),
            TrendAggregate::Max => trend.max(),
            TrendAggregate::Med => trend.median(),
        }
    }
}

/// Kind of metric a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Trend,
}

/// What a rule measures.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    Trend(TrendAggregate),

    /// Ratio of the rule's counter to itself plus its complement counter
    Rate { complement: String },

    Count,
}

/// One parsed threshold rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    metric: String,
    expression: String,
    kind: RuleKind,
    comparison: Comparison,
    limit: f64,
}

impl ThresholdRule {
    /// Parse `expression` declared on `metric`.
    ///
    /// `paired_with` names the complement counter and is required by (and only
    /// allowed on) `rate` rules.
    pub fn parse(metric: &str, expression: &str, paired_with: Option<&str>) -> CoreResult<Self> {
        let invalid = |message: &str| CoreError::invalid_threshold(metric, expression, message);

        if metric.trim().is_empty() {
            return Err(invalid("metric name is empty"));
        }

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();

        let (op_index, token, comparison) = Comparison::TOKENS
            .iter()
            .filter_map(|(token, cmp)| compact.find(token).map(|i| (i, *token, *cmp)))
            .min_by_key(|(i, token, _)| (*i, std::cmp::Reverse(token.len())))
            .ok_or_else(|| invalid("missing comparison operator"))?;

        let lhs = &compact[..op_index];
        let rhs = &compact[op_index + token.len()..];

        let limit: f64 = rhs
            .parse()
            .map_err(|_| invalid("limit is not a number"))?;
        if !limit.is_finite() {
            return Err(invalid("limit must be finite"));
        }

        let kind = match lhs {
            "avg" => RuleKind::Trend(TrendAggregate::Avg),
            "min" => RuleKind::Trend(TrendAggregate::Min),
            "max" => RuleKind::Trend(TrendAggregate::Max),
            "med" => RuleKind::Trend(TrendAggregate::Med),
            "count" => RuleKind::Count,
            "rate" => match paired_with {
                Some(complement) if !complement.trim().is_empty() => RuleKind::Rate {
                    complement: complement.trim().to_string(),
                },
                _ => return Err(invalid("rate rules need a `paired_with` counter")),
            },
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| invalid("unknown aggregate"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| invalid("percentile is not a number"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be within 0-100"));
                }
                RuleKind::Trend(TrendAggregate::Percentile(p))
            }
        };

        if paired_with.is_some() && !matches!(kind, RuleKind::Rate { .. }) {
            return Err(invalid("`paired_with` only applies to rate rules"));
        }

        Ok(Self {
            metric: metric.trim().to_string(),
            expression: expression.trim().to_string(),
            kind,
            comparison,
            limit,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn metric_kind(&self) -> MetricKind {
        match self.kind {
            RuleKind::Trend(_) => MetricKind::Trend,
            RuleKind::Rate { .. } | RuleKind::Count => MetricKind::Counter,
        }
    }

    /// Evaluate against `snapshot`. Pure: the same snapshot always yields the
    /// same outcome.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> RuleOutcome {
        let observed = match &self.kind {
            RuleKind::Trend(aggregate) => snapshot
                .trend(&self.metric)
                .and_then(|trend| aggregate.observe(trend))
                .map(|d| d.as_micros() as f64 / 1000.0),
            RuleKind::Rate { complement } => {
                let hits = snapshot.count(&self.metric);
                let total = hits + snapshot.count(complement);
                (total > 0).then(|| hits as f64 / total as f64)
            }
            RuleKind::Count => Some(snapshot.count(&self.metric) as f64),
        };

        let status = match observed {
            None => RuleStatus::Indeterminate,
            Some(value) if self.comparison.holds(value, self.limit) => RuleStatus::Pass,
            Some(_) => RuleStatus::Fail,
        };

        RuleOutcome {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            kind: self.metric_kind(),
            status,
            observed,
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Pass,
    Fail,
    /// No observations to judge yet
    Indeterminate,
}

/// Evaluation of one rule, with the value it observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub metric: String,
    pub expression: String,
    pub kind: MetricKind,
    pub status: RuleStatus,
    pub observed: Option<f64>,
}

impl RuleOutcome {
    pub fn failed(&self) -> bool {
        self.status == RuleStatus::Fail
    }
}

/// Overall pass/fail of a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// Logical AND over outcomes; indeterminate rules hold vacuously.
    pub fn from_outcomes(outcomes: &[RuleOutcome]) -> Self {
        if outcomes.iter().any(RuleOutcome::failed) {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Evaluates a fixed rule set against metric snapshots.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Outcome of every rule, in declaration order.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> Vec<RuleOutcome> {
        self.rules.iter().map(|r| r.evaluate(snapshot)).collect()
    }

    /// Outcomes currently failing.
    pub fn failing(&self, snapshot: &MetricSnapshot) -> Vec<RuleOutcome> {
        self.evaluate(snapshot)
            .into_iter()
            .filter(RuleOutcome::failed)
            .collect()
    }

    pub fn final_verdict(&self, snapshot: &MetricSnapshot) -> Verdict {
        Verdict::from_outcomes(&self.evaluate(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricSink;

    fn rule(metric: &str, expr: &str) -> ThresholdRule {
        ThresholdRule::parse(metric, expr, None).unwrap()
    }

    #[test]
    fn test_parse_shapes() {
        let r = rule("http_req_duration", "p(95)<500");
        assert_eq!(r.kind(), &RuleKind::Trend(TrendAggregate::Percentile(95.0)));
        assert_eq!(r.comparison(), Comparison::Lt);
        assert_eq!(r.limit(), 500.0);

        let r = rule("http_req_duration", " avg <= 200 ");
        assert_eq!(r.kind(), &RuleKind::Trend(TrendAggregate::Avg));
        assert_eq!(r.comparison(), Comparison::Le);

        let r = rule("created_links", "count>0");
        assert_eq!(r.kind(), &RuleKind::Count);
        assert_eq!(r.metric_kind(), MetricKind::Counter);

        let r = ThresholdRule::parse("http_req_failed", "rate<0.01", Some("http_req_ok")).unwrap();
        assert_eq!(
            r.kind(),
            &RuleKind::Rate {
                complement: "http_req_ok".to_string()
            }
        );

        assert_eq!(rule("t", "p(99.9)!=1").comparison(), Comparison::Ne);
        assert_eq!(rule("t", "max>=1").comparison(), Comparison::Ge);
    }

    #[test]
    fn test_parse_errors() {
        assert!(ThresholdRule::parse("m", "p(95)", None).is_err());
        assert!(ThresholdRule::parse("m", "p(95)<fast", None).is_err());
        assert!(ThresholdRule::parse("m", "p(150)<1", None).is_err());
        assert!(ThresholdRule::parse("m", "stddev<1", None).is_err());
        assert!(ThresholdRule::parse("m", "rate<0.01", None).is_err());
        assert!(ThresholdRule::parse("m", "count>0", Some("other")).is_err());
        assert!(ThresholdRule::parse("", "count>0", None).is_err());
    }

    #[test]
    fn test_trend_rule() {
        let sink = MetricSink::new();
        for ms in 1..=100 {
            sink.trend("http_req_duration").add(Duration::from_millis(ms));
        }
        let snapshot = sink.snapshot();

        let outcome = rule("http_req_duration", "p(95)<500").evaluate(&snapshot);
        assert_eq!(outcome.status, RuleStatus::Pass);
        assert!(outcome.observed.unwrap() > 94.0);

        let outcome = rule("http_req_duration", "max<100").evaluate(&snapshot);
        assert_eq!(outcome.status, RuleStatus::Fail);
        assert_eq!(outcome.observed, Some(100.0));
    }

    #[test]
    fn test_empty_trend_and_rate_are_indeterminate() {
        let snapshot = MetricSink::new().snapshot();

        let trend = rule("http_req_duration", "p(95)<500").evaluate(&snapshot);
        assert_eq!(trend.status, RuleStatus::Indeterminate);
        assert_eq!(trend.observed, None);

        let rate = ThresholdRule::parse("http_req_failed", "rate<0.01", Some("http_req_ok"))
            .unwrap()
            .evaluate(&snapshot);
        assert_eq!(rate.status, RuleStatus::Indeterminate);
    }

    #[test]
    fn test_missing_counter_counts_as_zero() {
        let snapshot = MetricSink::new().snapshot();
        let outcome = rule("created_links", "count>0").evaluate(&snapshot);
        assert_eq!(outcome.status, RuleStatus::Fail);
        assert_eq!(outcome.observed, Some(0.0));
    }

    #[test]
    fn test_rate_rule() {
        let sink = MetricSink::new();
        sink.counter("http_req_failed").add(1);
        sink.counter("http_req_ok").add(99);
        let rule = ThresholdRule::parse("http_req_failed", "rate<0.01", Some("http_req_ok")).unwrap();

        let outcome = rule.evaluate(&sink.snapshot());
        assert_eq!(outcome.observed, Some(0.01));
        assert_eq!(outcome.status, RuleStatus::Fail);

        sink.counter("http_req_ok").add(100);
        assert_eq!(rule.evaluate(&sink.snapshot()).status, RuleStatus::Pass);
    }

    #[test]
    fn test_verdict_is_and_over_rules() {
        let sink = MetricSink::new();
        sink.counter("created_links").add(3);
        let snapshot = sink.snapshot();

        let passing = ThresholdEvaluator::new(vec![
            rule("created_links", "count>0"),
            rule("http_req_duration", "p(95)<500"), // indeterminate
        ]);
        assert_eq!(passing.final_verdict(&snapshot), Verdict::Pass);

        let failing = ThresholdEvaluator::new(vec![
            rule("created_links", "count>0"),
            rule("successful_redirects", "count>0"),
        ]);
        assert_eq!(failing.final_verdict(&snapshot), Verdict::Fail);
        assert_eq!(failing.failing(&snapshot).len(), 1);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let sink = MetricSink::new();
        for ms in [3, 14, 15, 92, 65] {
            sink.trend("d").add(Duration::from_millis(ms));
        }
        sink.counter("c").add(7);
        let snapshot = sink.snapshot();

        let evaluator = ThresholdEvaluator::new(vec![
            rule("d", "p(90)<50"),
            rule("d", "med==15"),
            rule("c", "count>=7"),
        ]);
        let first = evaluator.evaluate(&snapshot);
        for _ in 0..10 {
            assert_eq!(evaluator.evaluate(&snapshot), first);
        }
    }

    #[test]
    fn test_outcome_serializes_for_reports() {
        let sink = MetricSink::new();
        sink.counter("http_req_failed").add(1);
        sink.counter("http_req_ok").add(99);

        let outcome = ThresholdRule::parse("http_req_failed", "rate<0.01", Some("http_req_ok"))
            .unwrap()
            .evaluate(&sink.snapshot());
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["metric"], "http_req_failed");
        assert_eq!(json["kind"], "counter");
        assert_eq!(json["status"], "fail");
        assert_eq!(json["observed"], 0.01);
    }
}
