//! In-memory shortener for tests and dry runs
//!
//! # Features
//!
//! - **Behaviors**: healthy, unreachable, rejecting or garbling creates
//! - **Failure onset**: turn every response into a 503 after N calls
//! - **Latency Simulation**: fixed delay per call
//! - **Call counters**: creates and resolves seen, for assertions
//! - **Bounded storage**: only the first links created stay resolvable
//!
//! # Examples
//!
//! ```rust
//! use loadgate_engine::target::{MockTarget, TargetClient};
//!
//! # async fn example() {
//! let mock = MockTarget::new();
//! let created = mock.create("https://example.com").await.unwrap();
//! assert_eq!(created.status, 201);
//! assert_eq!(mock.create_calls(), 1);
//! # }
//! ```

use super::{TargetClient, TargetResponse, NOT_FOUND_MARKER};
use crate::error::TargetError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Links kept by default; later creates answer 201 but are not resolvable.
pub const DEFAULT_LINK_CAPACITY: usize = 10_000;

/// How the mock answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Behaves like a correct shortener
    Healthy,

    /// Every call fails at the transport level
    Unreachable,

    /// Creates answer 500; resolves stay healthy
    RejectCreates,

    /// Creates answer 201 with a body that is not JSON
    GarbledCreates,
}

/// In-memory [`TargetClient`].
#[derive(Debug)]
pub struct MockTarget {
    behavior: MockBehavior,
    latency: Duration,
    healthy_calls: Option<u64>,
    link_capacity: usize,
    links: RwLock<HashMap<String, String>>,
    next_id: AtomicU64,
    calls: AtomicU64,
    create_calls: AtomicU64,
    resolve_calls: AtomicU64,
}

impl Default for MockTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTarget {
    /// Healthy mock with no latency.
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::Healthy,
            latency: Duration::ZERO,
            healthy_calls: None,
            link_capacity: DEFAULT_LINK_CAPACITY,
            links: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            create_calls: AtomicU64::new(0),
            resolve_calls: AtomicU64::new(0),
        }
    }

    /// Mock whose every call fails with a transport error.
    pub fn unreachable() -> Self {
        Self::new().with_behavior(MockBehavior::Unreachable)
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer 503 to every call after the first `calls` calls.
    pub fn failing_after(mut self, calls: u64) -> Self {
        self.healthy_calls = Some(calls);
        self
    }

    /// Store at most `capacity` links.
    pub fn with_link_capacity(mut self, capacity: usize) -> Self {
        self.link_capacity = capacity;
        self
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn resolve_calls(&self) -> u64 {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    /// Links currently stored.
    pub fn link_count(&self) -> usize {
        self.links.read().len()
    }

    /// Common prologue: latency, call accounting and forced failures.
    async fn enter(&self) -> Result<Option<TargetResponse>, TargetError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let call = self.calls.fetch_add(1, Ordering::Relaxed);

        if self.behavior == MockBehavior::Unreachable {
            return Err(TargetError::Transport("connection refused".to_string()));
        }

        if matches!(self.healthy_calls, Some(limit) if call >= limit) {
            return Ok(Some(TargetResponse {
                status: 503,
                location: None,
                body: "service unavailable".to_string(),
            }));
        }

        Ok(None)
    }

    fn next_code(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("m{:05}", id)
    }
}

#[async_trait]
impl TargetClient for MockTarget {
    async fn create(&self, original_url: &str) -> Result<TargetResponse, TargetError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(forced) = self.enter().await? {
            return Ok(forced);
        }

        match self.behavior {
            MockBehavior::RejectCreates => Ok(TargetResponse {
                status: 500,
                location: None,
                body: "internal server error".to_string(),
            }),
            MockBehavior::GarbledCreates => Ok(TargetResponse {
                status: 201,
                location: None,
                body: "created".to_string(),
            }),
            MockBehavior::Healthy | MockBehavior::Unreachable => {
                let code = self.next_code();
                {
                    let mut links = self.links.write();
                    if links.len() < self.link_capacity {
                        links.insert(code.clone(), original_url.to_string());
                    }
                }

                let body = serde_json::json!({
                    "short_code": code,
                    "original_url": original_url,
                })
                .to_string();

                Ok(TargetResponse {
                    status: 201,
                    location: None,
                    body,
                })
            }
        }
    }

    async fn resolve(&self, code: &str) -> Result<TargetResponse, TargetError> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(forced) = self.enter().await? {
            return Ok(forced);
        }

        let original = self.links.read().get(code).cloned();
        match original {
            Some(url) => Ok(TargetResponse {
                status: 302,
                location: Some(url),
                body: String::new(),
            }),
            None => Ok(TargetResponse {
                status: 200,
                location: None,
                body: format!("<html><body><h1>{}</h1></body></html>", NOT_FOUND_MARKER),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::decode_created_link;

    #[tokio::test]
    async fn test_create_then_resolve() {
        let mock = MockTarget::new();
        let created = mock.create("https://example.com/a").await.unwrap();
        let link = decode_created_link(&created).unwrap();

        let resolved = mock.resolve(&link.short_code).await.unwrap();
        assert_eq!(resolved.status, 302);
        assert_eq!(resolved.location.as_deref(), Some("https://example.com/a"));

        let missing = mock.resolve("INVALIDabc123").await.unwrap();
        assert_eq!(missing.status, 200);
        assert!(missing.body.contains(NOT_FOUND_MARKER));

        assert_eq!(mock.create_calls(), 1);
        assert_eq!(mock.resolve_calls(), 2);
        assert_eq!(mock.link_count(), 1);
    }

    #[tokio::test]
    async fn test_link_storage_is_bounded() {
        let mock = MockTarget::new().with_link_capacity(3);
        let mut codes = Vec::new();
        for i in 0..10 {
            let created = mock.create(&format!("https://example.com/{}", i)).await.unwrap();
            assert_eq!(created.status, 201);
            codes.push(decode_created_link(&created).unwrap().short_code);
        }

        assert_eq!(mock.link_count(), 3);
        assert_eq!(mock.resolve(&codes[0]).await.unwrap().status, 302);
        assert_eq!(mock.resolve(&codes[2]).await.unwrap().status, 302);

        let dropped = mock.resolve(&codes[9]).await.unwrap();
        assert_eq!(dropped.status, 200);
        assert!(dropped.body.contains(NOT_FOUND_MARKER));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let mock = MockTarget::unreachable();
        assert!(mock.create("https://example.com").await.is_err());
        assert!(mock.resolve("abc").await.unwrap_err().is_unreachable());
    }

    #[tokio::test]
    async fn test_failing_after() {
        let mock = MockTarget::new().failing_after(2);
        assert_eq!(mock.create("a").await.unwrap().status, 201);
        assert_eq!(mock.create("b").await.unwrap().status, 201);
        assert_eq!(mock.create("c").await.unwrap().status, 503);
        assert_eq!(mock.resolve("m00000").await.unwrap().status, 503);
    }

    #[tokio::test]
    async fn test_garbled_creates() {
        let mock = MockTarget::new().with_behavior(MockBehavior::GarbledCreates);
        let response = mock.create("https://example.com").await.unwrap();
        assert_eq!(response.status, 201);
        assert!(decode_created_link(&response).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let mock = MockTarget::new().with_latency(Duration::from_millis(250));
        let start = tokio::time::Instant::now();
        mock.resolve("x").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
