//! Error taxonomy of the pipeline engine.
//!
//! The telemetry layer consumes these as values: [`PipelineError::kind`]
//! becomes the `error_type` metric dimension and the `source()` chain ends up
//! in the `error.cause` span attribute.
use std::error::Error;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A categorized pipeline failure.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Invalid plugin or pipeline configuration. Fatal when creating a
    /// session.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The stream is unusable and the session must end.
    #[error("stream error: {message}")]
    Stream {
        /// What happened.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Some records of a batch failed; the rest were processed.
    #[error("batch error: {message} ({} records failed)", .failed_indices.len())]
    Batch {
        /// What happened.
        message: String,
        /// Positions of the failed records within the batch.
        failed_indices: Vec<usize>,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The connection to a peer failed.
    #[error("transport error: {message}")]
    Transport {
        /// What happened.
        message: String,
        /// Whether reconnecting may succeed.
        retryable: bool,
        /// Underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl PipelineError {
    /// A configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// A stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        PipelineError::Stream {
            message: message.into(),
            source: None,
        }
    }

    /// A partial batch failure.
    pub fn batch(message: impl Into<String>, failed_indices: Vec<usize>) -> Self {
        PipelineError::Batch {
            message: message.into(),
            failed_indices,
            source: None,
        }
    }

    /// A transport failure.
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        PipelineError::Transport {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Attach the error that caused this one.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        let slot = match &mut self {
            PipelineError::Config { source, .. }
            | PipelineError::Stream { source, .. }
            | PipelineError::Batch { source, .. }
            | PipelineError::Transport { source, .. } => source,
        };
        *slot = Some(cause.into());
        self
    }

    /// Category name used as the `error_type` metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config { .. } => "config",
            PipelineError::Stream { .. } => "stream",
            PipelineError::Batch { .. } => "batch",
            PipelineError::Transport { .. } => "transport",
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transport { retryable: true, .. })
    }

    /// Failed record positions of a batch error; empty otherwise.
    pub fn failed_indices(&self) -> &[usize] {
        match self {
            PipelineError::Batch { failed_indices, .. } => failed_indices,
            _ => &[],
        }
    }
}
