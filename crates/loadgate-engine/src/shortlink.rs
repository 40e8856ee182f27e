//! URL-shortener workload: create, redirect and not-found scenarios
//!
//! Metric names:
//!
//! | Metric                 | Kind    | Recorded when                               |
//! |------------------------|---------|---------------------------------------------|
//! | `created_links`        | counter | a create answers 201 (setup included)       |
//! | `successful_redirects` | counter | a redirect answers 302                      |
//! | `not_found_errors`     | counter | the not-found page shows its marker         |
//! | `create_link_duration` | trend   | every create                                |
//! | `redirect_duration`    | trend   | every redirect                              |
//! | `http_reqs`            | counter | every target call                           |
//! | `http_req_duration`    | trend   | every target call                           |
//! | `http_req_failed/ok`   | counter | transport error, timeout or status >= 400   |
//! | `checks_passed/failed` | counter | every named check                           |

use crate::context::SharedContext;
use crate::dispatcher::ScenarioDispatcher;
use crate::error::{SetupError, TargetError};
use crate::scenario::{Outcome, Scenario};
use crate::target::{decode_created_link, TargetClient, TargetResponse, NOT_FOUND_MARKER};
use crate::workload::Workload;
use async_trait::async_trait;
use chrono::Utc;
use loadgate_core::{CoreResult, Counter, LoadConfig, MetricSink, MetricSnapshot, Trend, WeightsConfig};
use rand::rngs::StdRng;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Prefix of codes that never exist on the target.
pub const INVALID_CODE_PREFIX: &str = "INVALID";

/// Random lowercase base-36 string of `len` characters.
pub fn random_base36<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Named pass/fail assertion.
#[derive(Debug)]
pub struct Check {
    label: &'static str,
    pass: Arc<Counter>,
    fail: Arc<Counter>,
    passed_total: Arc<Counter>,
    failed_total: Arc<Counter>,
}

impl Check {
    fn new(sink: &MetricSink, label: &'static str) -> Self {
        Self {
            label,
            pass: sink.counter(&format!("check:{}:pass", label)),
            fail: sink.counter(&format!("check:{}:fail", label)),
            passed_total: sink.counter("checks_passed"),
            failed_total: sink.counter("checks_failed"),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Record the result and hand it back.
    pub fn record(&self, passed: bool) -> bool {
        if passed {
            self.pass.increment();
            self.passed_total.increment();
        } else {
            self.fail.increment();
            self.failed_total.increment();
        }
        passed
    }
}

/// Handles to every metric the workload writes.
#[derive(Debug, Clone)]
pub struct ShortlinkMetrics {
    pub created_links: Arc<Counter>,
    pub successful_redirects: Arc<Counter>,
    pub not_found_errors: Arc<Counter>,
    pub create_link_failures: Arc<Counter>,
    pub redirect_failures: Arc<Counter>,
    pub not_found_failures: Arc<Counter>,
    pub create_link_duration: Arc<Trend>,
    pub redirect_duration: Arc<Trend>,
    pub http_reqs: Arc<Counter>,
    pub http_req_duration: Arc<Trend>,
    pub http_req_failed: Arc<Counter>,
    pub http_req_ok: Arc<Counter>,
}

impl ShortlinkMetrics {
    pub fn new(sink: &MetricSink) -> Self {
        Self {
            created_links: sink.counter("created_links"),
            successful_redirects: sink.counter("successful_redirects"),
            not_found_errors: sink.counter("not_found_errors"),
            create_link_failures: sink.counter("create_link_failures"),
            redirect_failures: sink.counter("redirect_failures"),
            not_found_failures: sink.counter("not_found_failures"),
            create_link_duration: sink.trend("create_link_duration"),
            redirect_duration: sink.trend("redirect_duration"),
            http_reqs: sink.counter("http_reqs"),
            http_req_duration: sink.trend("http_req_duration"),
            http_req_failed: sink.counter("http_req_failed"),
            http_req_ok: sink.counter("http_req_ok"),
        }
    }
}

/// Target client wrapper that times every call and records request metrics.
pub struct ShortlinkClient {
    target: Arc<dyn TargetClient>,
    metrics: ShortlinkMetrics,
    timeout: Duration,
}

impl ShortlinkClient {
    pub fn new(target: Arc<dyn TargetClient>, metrics: ShortlinkMetrics, timeout: Duration) -> Self {
        Self {
            target,
            metrics,
            timeout,
        }
    }

    pub fn metrics(&self) -> &ShortlinkMetrics {
        &self.metrics
    }

    pub async fn create(&self, original_url: &str) -> (Duration, Result<TargetResponse, TargetError>) {
        self.timed(self.target.create(original_url)).await
    }

    pub async fn resolve(&self, code: &str) -> (Duration, Result<TargetResponse, TargetError>) {
        self.timed(self.target.resolve(code)).await
    }

    async fn timed<F>(&self, call: F) -> (Duration, Result<TargetResponse, TargetError>)
    where
        F: Future<Output = Result<TargetResponse, TargetError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TargetError::Timeout(self.timeout)),
        };
        let elapsed = start.elapsed();

        self.metrics.http_reqs.increment();
        self.metrics.http_req_duration.add(elapsed);
        let failed = match &result {
            Ok(response) => response.is_failure(),
            Err(_) => true,
        };
        if failed {
            self.metrics.http_req_failed.increment();
        } else {
            self.metrics.http_req_ok.increment();
        }

        (elapsed, result)
    }
}

/// Creates a fresh link. The new code is not added to the shared pool.
pub struct CreateLinkScenario {
    client: Arc<ShortlinkClient>,
    status_is_201: Check,
    has_short_code: Check,
}

impl CreateLinkScenario {
    pub fn new(client: Arc<ShortlinkClient>, sink: &MetricSink) -> Self {
        Self {
            client,
            status_is_201: Check::new(sink, "create: status is 201"),
            has_short_code: Check::new(sink, "create: has short code"),
        }
    }
}

#[async_trait]
impl Scenario for CreateLinkScenario {
    fn name(&self) -> &str {
        "create_link"
    }

    async fn run(&self, _ctx: &SharedContext, rng: &mut StdRng) -> Outcome {
        let url = format!(
            "https://example.com/random/{}?timestamp={}",
            random_base36(rng, 6),
            Utc::now().timestamp_millis()
        );

        let (elapsed, result) = self.client.create(&url).await;
        let metrics = self.client.metrics();
        metrics.create_link_duration.add(elapsed);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.status_is_201.record(false);
                self.has_short_code.record(false);
                metrics.create_link_failures.increment();
                return Outcome::Failed(e.to_string());
            }
        };

        let created = self.status_is_201.record(response.status == 201);
        let decoded = decode_created_link(&response);
        let has_code = self.has_short_code.record(decoded.is_ok());

        if created {
            metrics.created_links.increment();
        }

        if created && has_code {
            Outcome::Success
        } else {
            metrics.create_link_failures.increment();
            match decoded {
                Err(e) if created => Outcome::Failed(e.to_string()),
                _ => Outcome::Failed(format!("create answered {}", response.status)),
            }
        }
    }
}

/// Resolves a random pooled code and expects a 302.
pub struct RedirectScenario {
    client: Arc<ShortlinkClient>,
    status_is_302: Check,
    has_location: Check,
}

impl RedirectScenario {
    pub fn new(client: Arc<ShortlinkClient>, sink: &MetricSink) -> Self {
        Self {
            client,
            status_is_302: Check::new(sink, "redirect: status is 302"),
            has_location: Check::new(sink, "redirect: has location header"),
        }
    }
}

#[async_trait]
impl Scenario for RedirectScenario {
    fn name(&self) -> &str {
        "redirect"
    }

    async fn run(&self, ctx: &SharedContext, rng: &mut StdRng) -> Outcome {
        let Some(code) = ctx.choose(rng) else {
            return Outcome::Skipped("redirect pool is empty".to_string());
        };

        let (elapsed, result) = self.client.resolve(code).await;
        let metrics = self.client.metrics();
        metrics.redirect_duration.add(elapsed);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.status_is_302.record(false);
                self.has_location.record(false);
                metrics.redirect_failures.increment();
                return Outcome::Failed(e.to_string());
            }
        };

        let redirected = self.status_is_302.record(response.status == 302);
        let has_location = self.has_location.record(response.location.is_some());

        if redirected {
            metrics.successful_redirects.increment();
        }

        if redirected && has_location {
            Outcome::Success
        } else {
            metrics.redirect_failures.increment();
            Outcome::Failed(format!(
                "redirect answered {} (location: {})",
                response.status,
                response.location.is_some()
            ))
        }
    }
}

/// Resolves a code that cannot exist and expects the not-found page.
pub struct NotFoundScenario {
    client: Arc<ShortlinkClient>,
    status_is_200: Check,
    shows_message: Check,
}

impl NotFoundScenario {
    pub fn new(client: Arc<ShortlinkClient>, sink: &MetricSink) -> Self {
        Self {
            client,
            status_is_200: Check::new(sink, "404: status is 200 (not found page)"),
            shows_message: Check::new(sink, "404: shows error message"),
        }
    }
}

#[async_trait]
impl Scenario for NotFoundScenario {
    fn name(&self) -> &str {
        "not_found"
    }

    async fn run(&self, _ctx: &SharedContext, rng: &mut StdRng) -> Outcome {
        let code = format!("{}{}", INVALID_CODE_PREFIX, random_base36(rng, 6));

        let (_, result) = self.client.resolve(&code).await;
        let metrics = self.client.metrics();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.status_is_200.record(false);
                self.shows_message.record(false);
                metrics.not_found_failures.increment();
                return Outcome::Failed(e.to_string());
            }
        };

        let page = self.status_is_200.record(response.status == 200);
        let marker = self
            .shows_message
            .record(response.body.contains(NOT_FOUND_MARKER));

        if marker {
            metrics.not_found_errors.increment();
        }

        if page && marker {
            Outcome::Success
        } else {
            metrics.not_found_failures.increment();
            Outcome::Failed(format!("`{}` answered {}", code, response.status))
        }
    }
}

/// Knobs of the shortener workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortlinkSettings {
    pub pool_size: u32,
    pub setup_pause: Duration,
    pub request_timeout: Duration,
    pub weights: WeightsConfig,
}

impl ShortlinkSettings {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            pool_size: config.workload.pool_size,
            setup_pause: config.workload.setup_pause,
            request_timeout: config.target.request_timeout,
            weights: config.workload.weights,
        }
    }
}

/// The URL-shortener workload.
pub struct ShortlinkWorkload {
    client: Arc<ShortlinkClient>,
    settings: ShortlinkSettings,
    dispatcher: ScenarioDispatcher,
}

impl ShortlinkWorkload {
    pub fn new(
        target: Arc<dyn TargetClient>,
        sink: &MetricSink,
        settings: ShortlinkSettings,
    ) -> CoreResult<Self> {
        let client = Arc::new(ShortlinkClient::new(
            target,
            ShortlinkMetrics::new(sink),
            settings.request_timeout,
        ));

        let weights = settings.weights;
        let dispatcher = ScenarioDispatcher::new(
            vec![
                (
                    weights.create,
                    Arc::new(CreateLinkScenario::new(Arc::clone(&client), sink)) as Arc<dyn Scenario>,
                ),
                (
                    weights.redirect,
                    Arc::new(RedirectScenario::new(Arc::clone(&client), sink)) as Arc<dyn Scenario>,
                ),
                (
                    weights.not_found,
                    Arc::new(NotFoundScenario::new(Arc::clone(&client), sink)) as Arc<dyn Scenario>,
                ),
            ],
            sink,
        )?;

        Ok(Self {
            client,
            settings,
            dispatcher,
        })
    }

    pub fn settings(&self) -> &ShortlinkSettings {
        &self.settings
    }
}

#[async_trait]
impl Workload for ShortlinkWorkload {
    async fn setup(&self) -> Result<SharedContext, SetupError> {
        let pool_size = self.settings.pool_size;
        info!(pool_size, "setup: creating initial short links");

        let metrics = self.client.metrics();
        let mut codes = Vec::with_capacity(pool_size as usize);
        let mut failures = 0u32;

        for i in 0..pool_size {
            let url = format!(
                "https://example.com/page-{}?test=loadgate&iteration={}&timestamp={}",
                i,
                i,
                Utc::now().timestamp_millis()
            );

            let (elapsed, result) = self.client.create(&url).await;
            metrics.create_link_duration.add(elapsed);

            match result {
                Err(e) if e.is_unreachable() => {
                    return Err(SetupError::Unreachable(e));
                }
                Err(e) => {
                    failures += 1;
                    warn!(iteration = i, error = %e, "setup create failed");
                }
                Ok(response) if response.status != 201 => {
                    failures += 1;
                    warn!(iteration = i, status = response.status, "setup create rejected");
                }
                Ok(response) => match decode_created_link(&response) {
                    Ok(link) => {
                        debug!(short_code = %link.short_code, "created short code");
                        metrics.created_links.increment();
                        codes.push(link.short_code);
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(iteration = i, error = %e, "failed to parse create response");
                    }
                },
            }

            if i + 1 < pool_size && !self.settings.setup_pause.is_zero() {
                tokio::time::sleep(self.settings.setup_pause).await;
            }
        }

        if codes.is_empty() {
            return Err(SetupError::EmptyPool {
                attempts: pool_size,
                failures,
            });
        }

        info!(created = codes.len(), failures, "setup complete");
        Ok(SharedContext::new(codes))
    }

    fn dispatcher(&self) -> &ScenarioDispatcher {
        &self.dispatcher
    }

    async fn teardown(&self, ctx: &SharedContext, snapshot: &MetricSnapshot) {
        info!(
            pool = ctx.len(),
            created_links = snapshot.count("created_links"),
            successful_redirects = snapshot.count("successful_redirects"),
            not_found_errors = snapshot.count("not_found_errors"),
            "teardown: load test complete"
        );
    }
}
