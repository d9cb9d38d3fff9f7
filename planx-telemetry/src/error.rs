//! Errors surfaced by provider initialization and shutdown.
//!
//! Steady-state recording never returns errors: spans, log records and
//! measurements that cannot be delivered are dropped and reported through the
//! crate's internal diagnostics instead.
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;

/// Failure to bring a telemetry subsystem up.
///
/// The error is stored by the initialization gate and handed back to every
/// later initializer, so it is `Clone` and carries only owned text.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum InitError {
    /// The export endpoint could not be parsed or uses an unsupported scheme.
    #[error("invalid export endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The resource describing this process could not be built.
    #[error("failed to build resource: {0}")]
    Resource(String),

    /// The exporter for the named signal failed to build.
    #[error("failed to build {signal} exporter: {message}")]
    Exporter {
        /// `traces`, `metrics` or `logs`.
        signal: &'static str,
        /// Exporter error text.
        message: String,
    },

    /// The log output destination could not be opened.
    #[error("failed to open log output {path:?}: {message}")]
    LogOutput {
        /// Path of the log file.
        path: String,
        /// I/O error text.
        message: String,
    },
}

impl InitError {
    pub(crate) fn exporter(signal: &'static str, err: impl std::fmt::Display) -> Self {
        InitError::Exporter {
            signal,
            message: err.to_string(),
        }
    }
}

/// Failure while flushing or releasing a subsystem's exporters.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShutdownError {
    /// Shutdown did not complete within the drain period.
    #[error("shutdown timed out after {0:?}")]
    Timeout(Duration),

    /// The SDK reported a failure for the named subsystem.
    #[error("{subsystem} shutdown failed: {message}")]
    Failed {
        /// Subsystem name.
        subsystem: &'static str,
        /// SDK error text.
        message: String,
    },
}

impl ShutdownError {
    pub(crate) fn from_sdk(subsystem: &'static str, err: OTelSdkError) -> Self {
        match err {
            OTelSdkError::Timeout(timeout) => ShutdownError::Timeout(timeout),
            other => ShutdownError::Failed {
                subsystem,
                message: other.to_string(),
            },
        }
    }
}
