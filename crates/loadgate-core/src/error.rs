use thiserror::Error;

/// Canonical error type for load profile, metric, and threshold definitions.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Ramp profile violates its structural invariants.
    #[error("invalid ramp profile: {message}")]
    InvalidProfile {
        /// Human-readable explanation of the violation.
        message: String,
    },

    /// Scenario weight table does not form a probability distribution.
    #[error("invalid scenario weights: {message}")]
    InvalidWeights {
        /// Human-readable explanation of the violation.
        message: String,
    },

    /// Threshold expression could not be parsed.
    #[error("invalid threshold `{expression}` on `{metric}`: {message}")]
    InvalidThreshold {
        /// Metric the rule was declared on.
        metric: String,
        /// Raw expression as written in configuration.
        expression: String,
        /// What is wrong with it.
        message: String,
    },

    /// Duration literal could not be parsed.
    #[error("invalid duration `{0}`: expected a number followed by ms, s, m or h")]
    InvalidDuration(String),
}

impl CoreError {
    /// Creates an `InvalidProfile` variant.
    #[must_use]
    pub fn invalid_profile(message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            message: message.into(),
        }
    }

    /// Creates an `InvalidWeights` variant.
    #[must_use]
    pub fn invalid_weights(message: impl Into<String>) -> Self {
        Self::InvalidWeights {
            message: message.into(),
        }
    }

    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn invalid_threshold(
        metric: impl Into<String>,
        expression: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidThreshold {
            metric: metric.into(),
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
