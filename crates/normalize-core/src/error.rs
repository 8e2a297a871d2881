//! Error types for normalization operations.
//!
//! This module defines [`NormalizeError`] which covers all error cases that
//! can occur when loading configuration, resolving metrics, or talking to a
//! store.

use thiserror::Error;

/// Errors that can occur during normalization.
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// Invalid configuration (malformed weights, bad mapping rule, etc.).
    ///
    /// Configuration errors are fatal at startup; they are never raised while
    /// a filing is being processed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A derived metric's calculation rule references itself, directly or
    /// through other derived metrics.
    #[error("Circular calculation rule for metric '{metric}': {path}")]
    CircularReference {
        /// The metric whose rule closes the cycle.
        metric: String,
        /// Human-readable dependency path, e.g. "a -> b -> a".
        path: String,
    },

    /// A mapping or calculation rule references a metric that is not defined.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Error parsing a calculation rule or stored value.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error interacting with the fact store or sink.
    #[error("Store error: {0}")]
    Store(String),

    /// The requested filing does not exist in the store.
    #[error("Filing not found: {0}")]
    FilingNotFound(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using [`NormalizeError`].
pub type Result<T> = std::result::Result<T, NormalizeError>;
