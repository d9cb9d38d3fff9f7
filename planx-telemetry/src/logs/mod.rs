//! Structured logging correlated with the active trace.
//!
//! [`Logging`] writes one line per record to the configured output, either as
//! compact JSON or as a human-readable line, through a `tracing-subscriber`
//! formatter private to the handle. Caller fields are grouped under
//! `fields`. When the context passed to a logging call carries a trace
//! identity, `trace_id` and `span_id` are added:
//!
//! ```text
//! {"timestamp":"2024-05-01T09:30:00.000Z","level":"INFO","message":"batch written","service":"planx","fields":"sink=http","trace_id":"4bf9...","span_id":"00f0..."}
//! 09:30:00.000  INFO batch written service="planx" fields=sink=http trace_id=4bf9... span_id=00f0...
//! ```
//!
//! The logger reads the identity from the [`Context`] only. It never talks
//! to the tracer, so either subsystem can be missing without affecting the
//! other.
//!
//! When an endpoint is configured every record is also emitted to an OTLP
//! log pipeline with its severity, body, attributes and trace context.
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use tracing::subscriber::NoSubscriber;
use tracing::{Dispatch, Subscriber};
use tracing_subscriber::filter::{Filtered, LevelFilter, Targets};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::config::{resolve_endpoint, validate_service_name, LogFormat, LoggingConfig, Signal};
use crate::conventions::SCOPE_NAME;
use crate::error::{InitError, ShutdownError};
use crate::identity::TraceIdentity;
use crate::internal_logging::{planx_info, planx_warn};
use crate::provider::{build_resource, InitOrigin, ProviderCell, ProviderStatus};

mod level;
mod local;

pub use level::LogLevel;

/// `tracing` layer forwarding events to the OTel log pipeline, filtered to
/// the logger's level with exporter crates silenced.
pub type TracingBridge<S> =
    Filtered<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, Targets, S>;

/// Crates whose events would loop back into the exporter that produced them.
const BRIDGE_SILENCED: [&str; 6] = [
    "hyper",
    "h2",
    "reqwest",
    "tonic",
    "opentelemetry",
    "planx-telemetry",
];

/// Attribute value as an OTel log attribute.
fn to_any_value(value: &Value) -> AnyValue {
    match value {
        Value::Bool(value) => AnyValue::Boolean(*value),
        Value::I64(value) => AnyValue::Int(*value),
        Value::F64(value) => AnyValue::Double(*value),
        Value::String(value) => AnyValue::String(value.clone()),
        other => AnyValue::String(other.to_string().into()),
    }
}

struct OtelLogs {
    provider: SdkLoggerProvider,
    logger: SdkLogger,
}

impl OtelLogs {
    fn new(provider: SdkLoggerProvider) -> Self {
        OtelLogs {
            logger: provider.logger(SCOPE_NAME),
            provider,
        }
    }

    fn emit(
        &self,
        time: SystemTime,
        level: LogLevel,
        message: &str,
        fields: &[KeyValue],
        identity: Option<TraceIdentity>,
        cx: &Context,
    ) {
        let mut record = self.logger.create_log_record();
        record.set_timestamp(time);
        record.set_observed_timestamp(time);
        record.set_severity_number(level.severity());
        record.set_severity_text(level.severity_text());
        record.set_body(AnyValue::from(message.to_string()));
        for field in fields {
            record.add_attribute(field.key.clone(), to_any_value(&field.value));
        }
        if let Some(identity) = identity {
            let span = cx.span();
            record.set_trace_context(
                identity.trace_id(),
                identity.span_id(),
                Some(span.span_context().trace_flags()),
            );
        }
        self.logger.emit(record);
    }
}

/// Builder for [`Logging`], for injecting a writer or a logger provider.
pub struct LoggingBuilder {
    config: LoggingConfig,
    writer: Option<Box<dyn Write + Send>>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl fmt::Debug for LoggingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingBuilder")
            .field("config", &self.config)
            .field("custom_writer", &self.writer.is_some())
            .field("logger_provider", &self.logger_provider)
            .finish()
    }
}

impl LoggingBuilder {
    /// Write lines to `writer` instead of the configured output.
    pub fn with_writer<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Emit OTel log records through `provider` instead of building one from
    /// the configured endpoint.
    pub fn with_logger_provider(mut self, provider: SdkLoggerProvider) -> Self {
        self.logger_provider = Some(provider);
        self
    }

    /// Open the output and, when configured, the OTLP log pipeline.
    pub fn build(self) -> Result<Logging, InitError> {
        validate_service_name(&self.config.service_name)?;

        let writer = match self.writer {
            Some(writer) => local::custom_writer(writer),
            None => local::make_writer(&self.config.output)?,
        };
        let dispatch = local::dispatch(self.config.format, self.config.level, writer);

        let otel = match self.logger_provider {
            Some(provider) => Some(OtelLogs::new(provider)),
            None => match resolve_endpoint(&self.config.endpoint, Signal::Logs)? {
                Some(url) => {
                    let exporter = opentelemetry_otlp::LogExporter::builder()
                        .with_http()
                        .with_endpoint(url.as_str())
                        .build()
                        .map_err(|err| InitError::exporter(Signal::Logs.as_str(), err))?;
                    planx_info!(name: "Logging.OtlpExporter", endpoint = url);
                    let provider = SdkLoggerProvider::builder()
                        .with_resource(build_resource(&self.config.service_name)?)
                        .with_batch_exporter(exporter)
                        .build();
                    Some(OtelLogs::new(provider))
                }
                None => None,
            },
        };

        Ok(Logging {
            level: self.config.level,
            format: self.config.format,
            service_name: self.config.service_name,
            dispatch,
            otel,
            is_shutdown: AtomicBool::new(false),
        })
    }
}

/// Handle to the correlated logger.
pub struct Logging {
    level: LogLevel,
    format: LogFormat,
    service_name: String,
    dispatch: Dispatch,
    otel: Option<OtelLogs>,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for Logging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logging")
            .field("level", &self.level)
            .field("format", &self.format)
            .field("service_name", &self.service_name)
            .field("otel", &self.otel.as_ref().map(|otel| &otel.provider))
            .finish()
    }
}

impl Logging {
    /// Start building a logger from `config`.
    pub fn builder(config: &LoggingConfig) -> LoggingBuilder {
        LoggingBuilder {
            config: config.clone(),
            writer: None,
            logger_provider: None,
        }
    }

    /// Logger described by `config`.
    pub fn from_config(config: &LoggingConfig) -> Result<Self, InitError> {
        Logging::builder(config).build()
    }

    /// A logger that discards everything.
    pub fn noop() -> Self {
        Logging {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            service_name: String::new(),
            dispatch: Dispatch::new(NoSubscriber::default()),
            otel: None,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Minimum level written.
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether a record at `level` would be written.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    /// Write one record. Below the minimum level the call does nothing.
    pub fn log(&self, level: LogLevel, cx: &Context, message: &str, fields: &[KeyValue]) {
        if !self.enabled(level) {
            return;
        }
        let time = SystemTime::now();
        let identity = TraceIdentity::from_context(cx);

        tracing::dispatcher::with_default(&self.dispatch, || {
            local::emit(level, &self.service_name, message, fields, identity)
        });

        if let Some(otel) = &self.otel {
            if !self.is_shutdown.load(Ordering::Acquire) {
                otel.emit(time, level, message, fields, identity, cx);
            }
        }
    }

    /// Record at [`LogLevel::Debug`].
    pub fn debug(&self, cx: &Context, message: &str, fields: &[KeyValue]) {
        self.log(LogLevel::Debug, cx, message, fields)
    }

    /// Record at [`LogLevel::Info`].
    pub fn info(&self, cx: &Context, message: &str, fields: &[KeyValue]) {
        self.log(LogLevel::Info, cx, message, fields)
    }

    /// Record at [`LogLevel::Warn`].
    pub fn warn(&self, cx: &Context, message: &str, fields: &[KeyValue]) {
        self.log(LogLevel::Warn, cx, message, fields)
    }

    /// Record at [`LogLevel::Error`].
    pub fn error(&self, cx: &Context, message: &str, fields: &[KeyValue]) {
        self.log(LogLevel::Error, cx, message, fields)
    }

    /// A `tracing` layer sending the application's `tracing` events to the
    /// same OTel log pipeline, or `None` when no pipeline is configured.
    ///
    /// Events below the logger's level are dropped, as are events from the
    /// HTTP and OTel crates the exporter itself logs through.
    ///
    /// ```no_run
    /// # use planx_telemetry::config::LoggingConfig;
    /// # use planx_telemetry::logs::Logging;
    /// use tracing_subscriber::prelude::*;
    ///
    /// let config = LoggingConfig { endpoint: "collector:4318".into(), ..Default::default() };
    /// let logging = Logging::from_config(&config).unwrap();
    /// if let Some(bridge) = logging.tracing_bridge() {
    ///     tracing_subscriber::registry().with(bridge).init();
    /// }
    /// ```
    pub fn tracing_bridge<S>(&self) -> Option<TracingBridge<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let filter = Targets::new()
            .with_default(self.level.level_filter())
            .with_targets(BRIDGE_SILENCED.map(|target| (target, LevelFilter::OFF)));
        self.otel
            .as_ref()
            .map(|otel| OpenTelemetryTracingBridge::new(&otel.provider).with_filter(filter))
    }

    /// The OTel logger provider, when OTLP export is configured.
    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.otel.as_ref().map(|otel| &otel.provider)
    }

    /// Export buffered OTel log records.
    pub fn force_flush(&self) -> Result<(), ShutdownError> {
        match &self.otel {
            Some(otel) if !self.is_shutdown.load(Ordering::Acquire) => otel
                .provider
                .force_flush()
                .map_err(|err| ShutdownError::from_sdk("logs", err)),
            _ => Ok(()),
        }
    }

    /// Flush and release the OTel log pipeline. Local output keeps working.
    /// Only the first call does any work.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(otel) = &self.otel else {
            return Ok(());
        };
        if let Err(err) = otel.provider.force_flush() {
            planx_warn!(name: "Logging.FlushFailed", error = err);
        }
        otel.provider
            .shutdown()
            .map_err(|err| ShutdownError::from_sdk("logs", err))
    }
}

/// Add `message` as an event on the span current in `cx`, if it is recording.
pub fn add_span_event(cx: &Context, message: &str) {
    let span = cx.span();
    if span.is_recording() {
        span.add_event(message.to_string(), Vec::new());
    }
}

/// Like [`add_span_event`], with event attributes.
pub fn add_span_event_with_attributes(cx: &Context, message: &str, attributes: &[KeyValue]) {
    let span = cx.span();
    if span.is_recording() {
        span.add_event(message.to_string(), attributes.to_vec());
    }
}

/// Owner of the process's [`Logging`] handle.
#[derive(Debug)]
pub struct LoggingProvider {
    baseline: LoggingConfig,
    cell: ProviderCell<Logging>,
}

impl Default for LoggingProvider {
    fn default() -> Self {
        LoggingProvider::new(LoggingConfig::default())
    }
}

impl LoggingProvider {
    /// An uninitialized provider that falls back to `baseline` on first use.
    pub fn new(baseline: LoggingConfig) -> Self {
        LoggingProvider {
            baseline,
            cell: ProviderCell::new("logs"),
        }
    }

    /// Initialize from `config`. Only the first initialization takes effect.
    pub fn init(&self, config: &LoggingConfig) -> Result<(), InitError> {
        self.cell
            .init_with(InitOrigin::Explicit, || Logging::from_config(config), Logging::noop)
    }

    /// Initialize with a pre-built handle.
    pub fn install(&self, logging: Logging) -> Result<(), InitError> {
        self.cell
            .init_with(InitOrigin::Explicit, || Ok(logging), Logging::noop)
    }

    /// The handle, initializing with the baseline configuration if needed.
    pub fn get(&self) -> &Logging {
        self.cell
            .get_or_init_with(|| Logging::from_config(&self.baseline), Logging::noop)
    }

    /// Current state.
    pub fn status(&self) -> ProviderStatus {
        self.cell.status()
    }

    /// How the provider was initialized, if it was.
    pub fn origin(&self) -> Option<InitOrigin> {
        self.cell.origin()
    }

    /// Shut the handle down if the provider was ever initialized.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        self.cell.get().map_or(Ok(()), Logging::shutdown)
    }
}
