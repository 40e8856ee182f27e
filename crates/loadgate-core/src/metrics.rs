//! Metric sink shared by all virtual workers
//!
//! Two primitives are provided:
//! - [`Counter`]: monotonic count backed by a single atomic
//! - [`Trend`]: distribution of observed durations backed by an HDR histogram
//!
//! Every metric is synchronized on its own. The [`MetricSink`] name registry is
//! only touched when a handle is first resolved, so workers holding `Arc`
//! handles never contend with writers of unrelated metrics.
//!
//! # Accuracy
//!
//! Trends record microseconds with 3 significant digits over 1µs..1h, so any
//! reported quantile is within 0.1% of the true sample value. Samples above one
//! hour saturate. The exact minimum and maximum are kept next to the histogram
//! and every quantile is clamped into `[min, max]`.
//!
//! # Example
//!
//! ```rust
//! use loadgate_core::metrics::MetricSink;
//! use std::time::Duration;
//!
//! let sink = MetricSink::new();
//! sink.counter("created_links").add(1);
//! sink.trend("redirect_duration").add(Duration::from_millis(12));
//!
//! let snapshot = sink.snapshot();
//! assert_eq!(snapshot.counter("created_links"), Some(1));
//! ```

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lowest value tracked by trend histograms (1µs).
const TREND_LOWEST_US: u64 = 1;

/// Highest value tracked by trend histograms (1 hour).
const TREND_HIGHEST_US: u64 = 3_600_000_000;

/// Significant decimal digits kept by trend histograms.
const TREND_SIGFIG: u8 = 3;

/// Monotonic counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    value: AtomicU64,
}

impl Counter {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `amount` to the counter.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Shorthand for `add(1)`.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Mutable state of a trend, guarded by the trend's own mutex.
struct TrendState {
    histogram: Histogram<u64>,
    count: u64,
    sum_us: u128,
    min_us: u64,
    max_us: u64,
}

impl TrendState {
    fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(TREND_LOWEST_US, TREND_HIGHEST_US, TREND_SIGFIG)
                .expect("trend histogram bounds are statically valid"),
            count: 0,
            sum_us: 0,
            min_us: u64::MAX,
            max_us: 0,
        }
    }
}

/// Streaming distribution of durations.
pub struct Trend {
    name: String,
    state: Mutex<TrendState>,
}

impl Trend {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TrendState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one observation.
    pub fn add(&self, value: Duration) {
        let us = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);

        let mut state = self.state.lock();
        state.histogram.saturating_record(us);
        state.count += 1;
        state.sum_us += u128::from(us);
        state.min_us = state.min_us.min(us);
        state.max_us = state.max_us.max(us);
    }

    /// Number of observations so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Quantile over the observations so far; `None` when empty.
    #[must_use]
    pub fn quantile(&self, p: f64) -> Option<Duration> {
        self.snapshot().quantile(p)
    }

    /// Copy of the current distribution.
    #[must_use]
    pub fn snapshot(&self) -> TrendSnapshot {
        let state = self.state.lock();
        TrendSnapshot {
            histogram: state.histogram.clone(),
            count: state.count,
            sum_us: state.sum_us,
            min_us: state.min_us,
            max_us: state.max_us,
        }
    }
}

impl fmt::Debug for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trend")
            .field("name", &self.name)
            .field("count", &self.count())
            .finish()
    }
}

/// Immutable copy of a trend's distribution.
#[derive(Clone)]
pub struct TrendSnapshot {
    histogram: Histogram<u64>,
    count: u64,
    sum_us: u128,
    min_us: u64,
    max_us: u64,
}

impl TrendSnapshot {
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest observation.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (!self.is_empty()).then(|| Duration::from_micros(self.min_us))
    }

    /// Largest observation.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (!self.is_empty()).then(|| Duration::from_micros(self.max_us))
    }

    /// Arithmetic mean of all observations.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        let mean_us = self.sum_us / u128::from(self.count);
        Some(Duration::from_micros(
            u64::try_from(mean_us).unwrap_or(u64::MAX),
        ))
    }

    /// Value at quantile `p` (0.0-1.0, clamped), never outside `[min, max]`.
    #[must_use]
    pub fn quantile(&self, p: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }

        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        let us = if p <= 0.0 {
            self.min_us
        } else if p >= 1.0 {
            self.max_us
        } else {
            self.histogram
                .value_at_quantile(p)
                .clamp(self.min_us, self.max_us)
        };

        Some(Duration::from_micros(us))
    }

    /// Median.
    #[must_use]
    pub fn median(&self) -> Option<Duration> {
        self.quantile(0.5)
    }

    /// Summary statistics in milliseconds.
    #[must_use]
    pub fn stats(&self) -> TrendStats {
        let ms = |d: Option<Duration>| d.map(|d| d.as_micros() as f64 / 1000.0).unwrap_or(0.0);
        TrendStats {
            count: self.count,
            avg_ms: ms(self.mean()),
            min_ms: ms(self.min()),
            med_ms: ms(self.median()),
            p90_ms: ms(self.quantile(0.90)),
            p95_ms: ms(self.quantile(0.95)),
            p99_ms: ms(self.quantile(0.99)),
            max_ms: ms(self.max()),
        }
    }
}

impl fmt::Debug for TrendSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrendSnapshot")
            .field("count", &self.count)
            .field("min", &self.min())
            .field("max", &self.max())
            .finish()
    }
}

/// Summary statistics of a trend, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub med_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Registry of named counters and trends.
#[derive(Debug, Default)]
pub struct MetricSink {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    trends: RwLock<HashMap<String, Arc<Trend>>>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (or create) the counter called `name`.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }

        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new(name))),
        )
    }

    /// Resolve (or create) the trend called `name`.
    pub fn trend(&self, name: &str) -> Arc<Trend> {
        if let Some(trend) = self.trends.read().get(name) {
            return Arc::clone(trend);
        }

        let mut trends = self.trends.write();
        Arc::clone(
            trends
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Trend::new(name))),
        )
    }

    /// Copy every metric. Each metric is read under its own synchronization,
    /// so the copy is consistent per metric.
    pub fn snapshot(&self) -> MetricSnapshot {
        let counter_handles: Vec<Arc<Counter>> = self.counters.read().values().cloned().collect();
        let trend_handles: Vec<Arc<Trend>> = self.trends.read().values().cloned().collect();

        let counters = counter_handles
            .iter()
            .map(|c| (c.name().to_string(), c.value()))
            .collect();
        let trends = trend_handles
            .iter()
            .map(|t| (t.name().to_string(), t.snapshot()))
            .collect();

        MetricSnapshot { counters, trends }
    }
}

/// Point-in-time copy of a [`MetricSink`].
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    counters: BTreeMap<String, u64>,
    trends: BTreeMap<String, TrendSnapshot>,
}

impl MetricSnapshot {
    /// Counter value; `None` if the counter was never resolved.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// Counter value with missing counters read as zero.
    #[must_use]
    pub fn count(&self, name: &str) -> u64 {
        self.counter(name).unwrap_or(0)
    }

    #[must_use]
    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        self.trends.get(name)
    }

    pub fn counters(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn trends(&self) -> impl Iterator<Item = (&str, &TrendSnapshot)> {
        self.trends.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Counters whose name starts with `prefix`, in name order.
    pub fn counters_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, u64)> + 'a {
        self.counters
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), *v))
    }
}
