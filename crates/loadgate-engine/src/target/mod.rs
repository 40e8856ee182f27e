//! Clients for the URL-shortener under test
//!
//! The engine only talks to the service through [`TargetClient`]:
//!
//! - [`HttpTarget`]: real HTTP client (reqwest, redirects disabled)
//! - [`MockTarget`]: in-memory shortener for tests and dry runs

mod http;
mod mock;

pub use http::HttpTarget;
pub use mock::{MockBehavior, MockTarget, DEFAULT_LINK_CAPACITY};

use crate::error::TargetError;
use async_trait::async_trait;
use serde::Deserialize;

/// Marker the target renders on its not-found page.
pub const NOT_FOUND_MARKER: &str = "Link Not Found";

/// Raw response of one target call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResponse {
    pub status: u16,
    /// `Location` header, if present
    pub location: Option<String>,
    pub body: String,
}

impl TargetResponse {
    /// A request fails when the target answers with a 4xx or 5xx status.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Body of a successful `POST /api/links`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedLink {
    pub short_code: String,
    #[serde(default)]
    pub original_url: Option<String>,
}

/// Decode the body of a create response.
pub fn decode_created_link(response: &TargetResponse) -> Result<CreatedLink, TargetError> {
    let link: CreatedLink = serde_json::from_str(&response.body)
        .map_err(|e| TargetError::Decode(e.to_string()))?;

    if link.short_code.trim().is_empty() {
        return Err(TargetError::Decode("short_code is empty".to_string()));
    }

    Ok(link)
}

/// URL-shortener operations issued by scenarios.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// `POST {base}/api/links` with `{"original_url": ...}`. Success is 201.
    async fn create(&self, original_url: &str) -> Result<TargetResponse, TargetError>;

    /// `GET {base}/{code}` without following redirects.
    ///
    /// Known codes answer 302 with a `Location` header; unknown codes answer
    /// 200 with a page containing [`NOT_FOUND_MARKER`].
    async fn resolve(&self, code: &str) -> Result<TargetResponse, TargetError>;
}
