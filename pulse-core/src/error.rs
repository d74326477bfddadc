//! Error types for Pulse.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Main error type for Pulse.
#[derive(Error, Debug)]
pub enum PulseError {
    // Metric validation errors
    #[error("metric name is empty")]
    EmptyMetricName,

    #[error("invalid metric kind: {0}")]
    InvalidMetricKind(String),

    #[error("counter metric is missing delta")]
    MissingDelta,

    #[error("gauge metric is missing value")]
    MissingValue,

    #[error("invalid metric value: {0}")]
    InvalidMetricValue(String),

    #[error("request payload is empty")]
    EmptyPayload,

    // Storage errors
    #[error("metric not found: {id}")]
    MetricNotFound { id: String },

    #[error("metric kind mismatch: {id}")]
    KindMismatch { id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // Transport security errors
    #[error("payload signature mismatch")]
    SignatureMismatch,

    #[error("source address is not in the trusted subnet")]
    Forbidden,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    // I/O and encoding errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compression(String),

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
