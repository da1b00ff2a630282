//! Error taxonomy for the synchronization core
//!
//! Internal helpers return these typed errors; only the API layer is allowed
//! to turn them into failure responses.

use thiserror::Error;

/// Errors produced by the metrics pipeline and the dynamic-config store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrainwatchError {
    /// A required or malformed request parameter, rejected before any I/O
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The metric store is unavailable or a query failed mid-flight
    #[error("metric store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Reading or replacing the dynamic-config file failed
    #[error("config file error at '{path}': {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The merged config could not be serialized for persistence
    #[error("config serialization error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
}

impl TrainwatchError {
    /// Shorthand for a field-level validation error
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ConfigIo { .. })
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Bad requests are the caller's problem, not an operational fault
            Self::Validation { .. } => tracing::Level::DEBUG,
            Self::Store(_) | Self::ConfigIo { .. } => tracing::Level::WARN,
            Self::ConfigEncode(_) => tracing::Level::ERROR,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = TrainwatchError> = std::result::Result<T, E>;
