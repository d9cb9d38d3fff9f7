//! Local log output, rendered by `tracing-subscriber`'s formatters.
//!
//! Each [`Logging`](super::Logging) handle owns a private [`Dispatch`] so its
//! level, format and writer never depend on the application's global
//! subscriber.
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

use opentelemetry::KeyValue;
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry};

use crate::config::{LogFormat, LogOutput};
use crate::error::InitError;
use crate::identity::TraceIdentity;

use super::LogLevel;

/// Target of every locally written record.
pub(crate) const TARGET: &str = "planx";

/// Writer for the configured output. Files are created if missing and
/// appended to.
pub(crate) fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, InitError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| InitError::LogOutput {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    })
}

/// Writer wrapping a caller-supplied sink.
pub(crate) fn custom_writer(writer: Box<dyn Write + Send>) -> BoxMakeWriter {
    BoxMakeWriter::new(Mutex::new(writer))
}

/// Subscriber writing `format` lines at or above `level` to `writer`.
pub(crate) fn dispatch(format: LogFormat, level: LogLevel, writer: BoxMakeWriter) -> Dispatch {
    let layer = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_target(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
            .with_writer(writer)
            .boxed(),
    };
    Dispatch::new(Registry::default().with(layer.with_filter(level.level_filter())))
}

/// Caller fields rendered as `key=value` pairs under one `fields` key, so
/// they can never shadow `message`, `trace_id` or the other reserved keys.
struct FieldList<'a>(&'a [KeyValue]);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.key.as_str(), field.value)?;
        }
        Ok(())
    }
}

macro_rules! local_event {
    ($level:expr, $($rest:tt)+) => {
        match $level {
            LogLevel::Debug => tracing::event!(target: TARGET, Level::DEBUG, $($rest)+),
            LogLevel::Info => tracing::event!(target: TARGET, Level::INFO, $($rest)+),
            LogLevel::Warn => tracing::event!(target: TARGET, Level::WARN, $($rest)+),
            LogLevel::Error => tracing::event!(target: TARGET, Level::ERROR, $($rest)+),
        }
    };
}

/// Emit one record to the current dispatcher.
pub(crate) fn emit(
    level: LogLevel,
    service: &str,
    message: &str,
    fields: &[KeyValue],
    identity: Option<TraceIdentity>,
) {
    let fields = (!fields.is_empty()).then(|| tracing::field::display(FieldList(fields)));
    let trace_id = identity.map(|identity| tracing::field::display(identity.trace_id()));
    let span_id = identity.map(|identity| tracing::field::display(identity.span_id()));
    local_event!(
        level,
        service = service,
        fields = fields,
        trace_id = trace_id,
        span_id = span_id,
        "{}",
        message
    );
}
