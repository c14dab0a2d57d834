//! Error type shared by the inference engines.

use thiserror::Error;

/// Errors raised by the ABC engines.
///
/// Simulator failures, proposals with zero prior density and running out of
/// simulation budget are part of normal operation and never surface here.
#[derive(Debug, Error)]
pub enum AbcError {
    /// A configuration value is out of range.
    #[error("invalid configuration: `{field}` {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
    /// Two configuration options cannot be combined.
    #[error("conflicting options: {0}")]
    ConflictingOptions(String),
    /// A distance was evaluated before it was calibrated.
    #[error("distance has not been calibrated")]
    UncalibratedDistance,
    /// The simulator returned a statistic vector of the wrong length.
    #[error("simulator returned {found} summary statistics, expected {expected}")]
    StatisticLength { expected: usize, found: usize },
    /// The prior returned a parameter vector of the wrong length.
    #[error("prior returned {found} parameters, expected {expected}")]
    ParameterLength { expected: usize, found: usize },
    /// The perturbation covariance is not positive definite.
    #[error("perturbation covariance is not positive definite")]
    SingularCovariance,
    /// Importance weights cannot be used for resampling.
    #[error("invalid importance weights: {0}")]
    Weights(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl AbcError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        AbcError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
