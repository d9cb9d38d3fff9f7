//! Spans for pipeline operations.
//!
//! [`TracingProvider`] owns the process's tracer. It is initialized once,
//! either explicitly through [`TracingProvider::init`] /
//! [`TracingProvider::install`] or lazily with its baseline configuration on
//! the first [`TracingProvider::get`]. Spans are opened from an explicit
//! parent [`Context`]:
//!
//! ```no_run
//! use opentelemetry::Context;
//! use planx_telemetry::config::TracingConfig;
//! use planx_telemetry::trace::TracingProvider;
//!
//! let provider = TracingProvider::new(TracingConfig::default());
//! provider.init(&TracingConfig::default()).unwrap();
//!
//! let tracing = provider.get();
//! let read = tracing.start_source_read(&Context::new(), "t1", "s1", 100);
//! let write = tracing.start_sink_write(read.context(), "http", "s1", 100);
//! write.close();
//! read.close();
//! ```
//!
//! With an empty endpoint spans go to stdout; otherwise they are exported
//! over OTLP/HTTP in batches. Every span is sampled.
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::global;
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider};

use crate::config::{resolve_endpoint, Signal, TracingConfig};
use crate::conventions::SCOPE_NAME;
use crate::error::{InitError, ShutdownError};
use crate::internal_logging::{planx_info, planx_warn};
use crate::propagation::Propagator;
use crate::provider::{build_resource, InitOrigin, ProviderCell, ProviderStatus};

mod events;
mod span;

pub use events::PipelineEvent;
pub use span::PipelineSpan;

#[derive(Debug)]
enum TracerKind {
    Sdk(SdkTracer),
    Noop(NoopTracer),
}

/// Handle to an initialized (or degraded) tracer.
#[derive(Debug)]
pub struct Tracing {
    tracer: TracerKind,
    provider: Option<SdkTracerProvider>,
    is_shutdown: AtomicBool,
}

impl Tracing {
    /// Build the tracer described by `config`.
    pub fn from_config(config: &TracingConfig) -> Result<Self, InitError> {
        let resource = build_resource(&config.service_name)?;
        let builder = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_sampler(Sampler::AlwaysOn);

        let provider = match resolve_endpoint(&config.endpoint, Signal::Traces)? {
            Some(url) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(url.as_str())
                    .build()
                    .map_err(|err| InitError::exporter(Signal::Traces.as_str(), err))?;
                planx_info!(name: "Tracing.OtlpExporter", endpoint = url);
                builder.with_batch_exporter(exporter).build()
            }
            None => builder
                .with_batch_exporter(opentelemetry_stdout::SpanExporter::default())
                .build(),
        };

        Ok(Tracing::from_provider(provider))
    }

    /// Wrap an already built provider, for custom exporters and tests.
    pub fn from_provider(provider: SdkTracerProvider) -> Self {
        Tracing {
            tracer: TracerKind::Sdk(provider.tracer(SCOPE_NAME)),
            provider: Some(provider),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// A tracer that records nothing. Spans still carry the parent's
    /// identity, so propagation keeps working.
    pub fn noop() -> Self {
        Tracing {
            tracer: TracerKind::Noop(NoopTracer::new()),
            provider: None,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Whether this handle exports nothing.
    pub fn is_noop(&self) -> bool {
        self.provider.is_none()
    }

    /// The SDK provider behind this handle.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.provider.as_ref()
    }

    /// Open a span as a child of the identity in `cx`, or as a new root when
    /// `cx` carries none.
    pub fn start_span(
        &self,
        cx: &Context,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) -> PipelineSpan {
        let name = name.into();
        let child = match &self.tracer {
            TracerKind::Sdk(tracer) => start_in(tracer, cx, name.clone(), attributes),
            TracerKind::Noop(tracer) => start_in(tracer, cx, name.clone(), attributes),
        };
        PipelineSpan::new(child, name)
    }

    /// Open the span for a pipeline event.
    pub fn start_event(&self, cx: &Context, event: &PipelineEvent<'_>) -> PipelineSpan {
        self.start_span(cx, event.span_name(), event.attributes())
    }

    /// `source.read` for one batch.
    pub fn start_source_read(
        &self,
        cx: &Context,
        tenant_id: &str,
        session_id: &str,
        batch_size: usize,
    ) -> PipelineSpan {
        self.start_event(
            cx,
            &PipelineEvent::SourceRead {
                tenant_id,
                session_id,
                batch_size,
            },
        )
    }

    /// `processor.process` for one batch.
    pub fn start_processor(
        &self,
        cx: &Context,
        processor: &str,
        session_id: &str,
        batch_size: usize,
    ) -> PipelineSpan {
        self.start_event(
            cx,
            &PipelineEvent::Process {
                processor,
                session_id,
                batch_size,
            },
        )
    }

    /// `sink.write` for one batch.
    pub fn start_sink_write(
        &self,
        cx: &Context,
        sink: &str,
        session_id: &str,
        batch_size: usize,
    ) -> PipelineSpan {
        self.start_event(
            cx,
            &PipelineEvent::SinkWrite {
                sink,
                session_id,
                batch_size,
            },
        )
    }

    /// `engine.route` between two stages.
    pub fn start_route(&self, cx: &Context, from: &str, to: &str) -> PipelineSpan {
        self.start_event(cx, &PipelineEvent::Route { from, to })
    }

    /// Export every finished span still buffered.
    pub fn force_flush(&self) -> Result<(), ShutdownError> {
        match &self.provider {
            Some(provider) if !self.is_shutdown.load(Ordering::Acquire) => provider
                .force_flush()
                .map_err(|err| ShutdownError::from_sdk("traces", err)),
            _ => Ok(()),
        }
    }

    /// Flush and release the exporter. Only the first call does any work.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(provider) = &self.provider else {
            return Ok(());
        };
        if let Err(err) = provider.force_flush() {
            planx_warn!(name: "Tracing.FlushFailed", error = err);
        }
        provider
            .shutdown()
            .map_err(|err| ShutdownError::from_sdk("traces", err))
    }

    fn register_global(&self) {
        if let Some(provider) = &self.provider {
            global::set_tracer_provider(provider.clone());
        }
        Propagator::install_global();
    }
}

fn start_in<T>(tracer: &T, cx: &Context, name: Cow<'static, str>, attributes: Vec<KeyValue>) -> Context
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    let span = tracer
        .span_builder(name)
        .with_attributes(attributes)
        .start_with_context(tracer, cx);
    cx.with_span(span)
}

/// Owner of the process's [`Tracing`] handle.
#[derive(Debug)]
pub struct TracingProvider {
    baseline: TracingConfig,
    cell: ProviderCell<Tracing>,
}

impl Default for TracingProvider {
    fn default() -> Self {
        TracingProvider::new(TracingConfig::default())
    }
}

impl TracingProvider {
    /// An uninitialized provider that falls back to `baseline` on first use.
    pub fn new(baseline: TracingConfig) -> Self {
        TracingProvider {
            baseline,
            cell: ProviderCell::new("traces"),
        }
    }

    /// Initialize from `config`, register the tracer provider and the W3C
    /// propagator globally. Only the first initialization takes effect.
    pub fn init(&self, config: &TracingConfig) -> Result<(), InitError> {
        self.cell.init_with(
            InitOrigin::Explicit,
            || Tracing::from_config(config).map(registered),
            Tracing::noop,
        )
    }

    /// Initialize with a pre-built handle.
    pub fn install(&self, tracing: Tracing) -> Result<(), InitError> {
        self.cell
            .init_with(InitOrigin::Explicit, || Ok(registered(tracing)), Tracing::noop)
    }

    /// The handle, initializing with the baseline configuration if needed.
    pub fn get(&self) -> &Tracing {
        self.cell.get_or_init_with(
            || Tracing::from_config(&self.baseline).map(registered),
            Tracing::noop,
        )
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
        self.cell.get().map_or(Ok(()), Tracing::shutdown)
    }
}

fn registered(tracing: Tracing) -> Tracing {
    tracing.register_global();
    tracing
}
