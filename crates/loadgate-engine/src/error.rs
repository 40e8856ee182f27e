use loadgate_core::CoreError;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the target service.
#[derive(Debug, Clone, Error)]
pub enum TargetError {
    /// Connection refused, DNS failure, reset, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the per-request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Response arrived but its body could not be decoded.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl TargetError {
    /// True for failures that mean the target could not be reached at all.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TargetError::Transport(_) | TargetError::Timeout(_))
    }
}

/// Unrecoverable setup failure; the run is aborted before any worker starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("target unreachable during setup: {0}")]
    Unreachable(#[source] TargetError),

    #[error("setup produced an empty pool ({attempts} attempts, {failures} rejected)")]
    EmptyPool { attempts: u32, failures: u32 },

    #[error("setup cancelled")]
    Cancelled,
}

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("setup aborted: {0}")]
    SetupAborted(#[from] SetupError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] CoreError),

    #[error("failed to build target client: {0}")]
    Target(#[from] TargetError),

    #[error("run already started")]
    AlreadyStarted,
}

/// Convenient result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_classification() {
        assert!(TargetError::Transport("refused".into()).is_unreachable());
        assert!(TargetError::Timeout(Duration::from_secs(30)).is_unreachable());
        assert!(!TargetError::Decode("eof".into()).is_unreachable());
    }

    #[test]
    fn test_setup_error_wraps() {
        let err: EngineError = SetupError::EmptyPool {
            attempts: 5,
            failures: 5,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "setup aborted: setup produced an empty pool (5 attempts, 5 rejected)"
        );
    }
}
