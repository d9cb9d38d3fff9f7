//! One owner for all three subsystems.
//!
//! The engine's entry point builds a [`Telemetry`], calls
//! [`Telemetry::init`] once, then passes `&Telemetry` (or the individual
//! providers) to every component. Nothing here is a process global apart
//! from the registrations OpenTelemetry itself requires.
use opentelemetry::Context;

use crate::config::TelemetryConfig;
use crate::error::{InitError, ShutdownError};
use crate::logs::{Logging, LoggingProvider};
use crate::metrics::{Metrics, MetricsProvider, MetricsRecorder};
use crate::propagation::Propagator;
use crate::trace::{PipelineSpan, Tracing, TracingProvider};

/// Tracing, metrics and logging behind one handle.
#[derive(Debug)]
pub struct Telemetry {
    config: TelemetryConfig,
    tracing: TracingProvider,
    metrics: MetricsProvider,
    logging: LoggingProvider,
    propagator: Propagator,
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry::new(TelemetryConfig::default())
    }
}

impl Telemetry {
    /// Providers that use `config` both for [`init`](Telemetry::init) and
    /// as the fallback on first use.
    pub fn new(config: TelemetryConfig) -> Self {
        Telemetry {
            tracing: TracingProvider::new(config.tracing.clone()),
            metrics: MetricsProvider::new(config.metrics.clone()),
            logging: LoggingProvider::new(config.logging.clone()),
            propagator: Propagator::new(),
            config,
        }
    }

    /// Initialize every subsystem.
    ///
    /// All three are attempted even if one fails; a failed subsystem is left
    /// degraded and the first error is returned.
    pub fn init(&self) -> Result<(), InitError> {
        let tracing = self.tracing.init(&self.config.tracing);
        let metrics = self.metrics.init(&self.config.metrics);
        let logging = self.logging.init(&self.config.logging);
        tracing.and(metrics).and(logging)
    }

    /// The configuration this instance was built with.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Trace provider.
    pub fn tracing_provider(&self) -> &TracingProvider {
        &self.tracing
    }

    /// Metrics provider.
    pub fn metrics_provider(&self) -> &MetricsProvider {
        &self.metrics
    }

    /// Logging provider.
    pub fn logging_provider(&self) -> &LoggingProvider {
        &self.logging
    }

    /// Tracer handle, initializing with defaults on first use.
    pub fn tracing(&self) -> &Tracing {
        self.tracing.get()
    }

    /// Metrics handle, initializing with defaults on first use.
    pub fn metrics(&self) -> &Metrics {
        self.metrics.get()
    }

    /// Recorder that never triggers initialization.
    pub fn recorder(&self) -> MetricsRecorder<'_> {
        self.metrics.recorder()
    }

    /// Logger handle, initializing with defaults on first use.
    pub fn logging(&self) -> &Logging {
        self.logging.get()
    }

    /// Carrier propagator.
    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Start a span named `name` under `cx`.
    pub fn start_span(&self, cx: &Context, name: &'static str) -> PipelineSpan {
        self.tracing().start_span(cx, name, Vec::new())
    }

    /// Shut down every subsystem that was initialized, traces first so their
    /// final spans are flushed before the log pipeline closes.
    ///
    /// Every subsystem is attempted; the first error is returned.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        let tracing = self.tracing.shutdown();
        let metrics = self.metrics.shutdown();
        let logging = self.logging.shutdown();
        tracing.and(metrics).and(logging)
    }
}
