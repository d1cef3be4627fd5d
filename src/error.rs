//! Error types for the allocation engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for allocation, optimization and comparison.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Weights must sum to 1 (got {sum:.8})")]
    InvalidWeights { sum: f64 },

    #[error("Insufficient data: need at least {needed} rows, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Zero variance in denominator: {what}")]
    ZeroVariance { what: String },

    #[error("Numeric non-convergence: {0}")]
    NumericNonConvergence(String),

    #[error("Data unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Coarse failure classes used when reporting why a strategy did not score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad weights, short or empty history, zero variance.
    Input,
    /// A solver or a guarded formula could not produce a usable number.
    NumericNonConvergence,
    /// Price or benchmark data could not be obtained.
    UpstreamUnavailable,
    /// Everything else (IO, parsing, misuse).
    Internal,
}

impl AllocationError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AllocationError::InvalidInput(_)
            | AllocationError::InvalidWeights { .. }
            | AllocationError::InsufficientData { .. }
            | AllocationError::ZeroVariance { .. } => ErrorCategory::Input,
            AllocationError::NumericNonConvergence(_) => ErrorCategory::NumericNonConvergence,
            AllocationError::Unavailable(_) => ErrorCategory::UpstreamUnavailable,
            _ => ErrorCategory::Internal,
        }
    }

    /// Shorthand for an `InvalidInput` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        AllocationError::InvalidInput(msg.into())
    }
}

/// Result type alias for allocation operations.
pub type Result<T> = std::result::Result<T, AllocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            AllocationError::InvalidWeights { sum: 0.98 }.category(),
            ErrorCategory::Input
        );
        assert_eq!(
            AllocationError::ZeroVariance { what: "SPY".into() }.category(),
            ErrorCategory::Input
        );
        assert_eq!(
            AllocationError::NumericNonConvergence("beta".into()).category(),
            ErrorCategory::NumericNonConvergence
        );
        assert_eq!(
            AllocationError::Unavailable("AAPL".into()).category(),
            ErrorCategory::UpstreamUnavailable
        );
        assert_eq!(
            AllocationError::InvalidState("finalized".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_display() {
        let err = AllocationError::InsufficientData {
            needed: 2,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data: need at least 2 rows, have 1"
        );
    }
}
