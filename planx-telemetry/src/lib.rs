//! Trace, metric and log correlation for the planx pipeline engine.
//!
//! A batch moving from a source through processors to a sink should be
//! followable end to end: every span, log line and metric point it produces
//! is tied to the same trace identity, and the identity survives the hops
//! between processes through W3C trace-context carriers.
//!
//! The crate is built on the OpenTelemetry SDK:
//!
//! * [`trace`] opens spans for pipeline operations and keeps their status
//!   consistent on error and close.
//! * [`metrics`] registers the pipeline instruments and records into them.
//! * [`logs`] writes structured log lines that carry the active trace
//!   identity and can export them as OTel logs.
//! * [`propagation`] moves the identity across process boundaries.
//! * [`Telemetry`] owns all three providers.
//!
//! Context is always passed explicitly as an [`opentelemetry::Context`]:
//!
//! ```no_run
//! use std::collections::HashMap;
//! use opentelemetry::Context;
//! use planx_telemetry::{Telemetry, TelemetryConfig};
//!
//! let telemetry = Telemetry::new(TelemetryConfig::from_env());
//! telemetry.init().expect("telemetry");
//!
//! let read = telemetry
//!     .tracing()
//!     .start_source_read(&Context::new(), "tenant-1", "session-7", 100);
//! telemetry.logging().info(read.context(), "batch read", &[]);
//! telemetry
//!     .recorder()
//!     .record_batch_sent("tenant-1", "source", "mysql", 100);
//!
//! // Hand the identity to the next process.
//! let carrier: HashMap<String, String> = telemetry.propagator().to_carrier(read.context());
//! read.close();
//!
//! telemetry.shutdown().expect("shutdown");
//! ```
//!
//! # Initialization
//!
//! Each provider initializes exactly once. Concurrent initializers block and
//! then share the outcome. A failed initialization leaves a no-op handle in
//! place, so instrumentation call sites never need to check for errors.
//! Using a provider before initializing it falls back to its baseline
//! configuration, and a later explicit `init` is then ignored with a
//! `Provider.ExplicitConfigIgnored` warning; see [`provider`].
//!
//! # Diagnostics
//!
//! The crate reports its own problems (ignored configuration, failed writes,
//! degraded providers) as `tracing` events with the `planx-telemetry` target.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

pub(crate) mod internal_logging;

pub mod config;
pub mod conventions;
pub mod error;
pub mod identity;
pub mod logs;
pub mod metrics;
pub mod pipeline_error;
pub mod propagation;
pub mod provider;
pub mod trace;

mod telemetry;

pub use config::TelemetryConfig;
pub use error::{InitError, ShutdownError};
pub use identity::TraceIdentity;
pub use pipeline_error::PipelineError;
pub use provider::{InitOrigin, ProviderStatus};
pub use telemetry::Telemetry;
pub use trace::{PipelineEvent, PipelineSpan};
