//! Cross-process serialization of the trace identity.
//!
//! [`Propagator`] writes and reads the W3C `traceparent`, `tracestate` and
//! `baggage` entries of a flat carrier. `HashMap<String, String>` works as a
//! carrier out of the box; any [`Injector`]/[`Extractor`] is accepted, so
//! message headers of a transport can be used directly.
//!
//! Extraction never fails. Keys that are missing or malformed leave the
//! input context as it was, and unrelated keys are ignored.
//!
//! ```
//! use std::collections::HashMap;
//! use opentelemetry::Context;
//! use planx_telemetry::propagation::Propagator;
//!
//! let propagator = Propagator::new();
//! let mut carrier: HashMap<String, String> = HashMap::new();
//! propagator.inject(&Context::new(), &mut carrier);
//! let cx = propagator.extract(&Context::new(), &carrier);
//! assert!(!planx_telemetry::identity::has_active_span(&cx));
//! ```
use std::collections::HashMap;
use std::fmt;

use opentelemetry::global;
use opentelemetry::propagation::{
    text_map_propagator::FieldIter, Extractor, Injector, TextMapCompositePropagator,
    TextMapPropagator,
};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};

/// W3C trace-context and baggage propagation.
pub struct Propagator {
    inner: TextMapCompositePropagator,
}

impl fmt::Debug for Propagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagator")
            .field("fields", &self.fields().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Propagator::new()
    }
}

impl Propagator {
    /// Trace context followed by baggage.
    pub fn new() -> Self {
        Propagator {
            inner: TextMapCompositePropagator::new(vec![
                Box::new(TraceContextPropagator::new()),
                Box::new(BaggagePropagator::new()),
            ]),
        }
    }

    /// Register a propagator with the same behavior as the process-wide
    /// OpenTelemetry text-map propagator, for libraries that read it from
    /// `opentelemetry::global`.
    pub fn install_global() {
        global::set_text_map_propagator(Propagator::new());
    }

    /// Write the identity and baggage of `cx` into `carrier`.
    ///
    /// A context without an identity writes no `traceparent`.
    pub fn inject(&self, cx: &Context, carrier: &mut dyn Injector) {
        self.inner.inject_context(cx, carrier);
    }

    /// `cx` extended with whatever identity and baggage `carrier` holds.
    pub fn extract(&self, cx: &Context, carrier: &dyn Extractor) -> Context {
        self.inner.extract_with_context(cx, carrier)
    }

    /// Carrier of `cx` as a fresh map.
    pub fn to_carrier(&self, cx: &Context) -> HashMap<String, String> {
        let mut carrier: HashMap<String, String> = HashMap::new();
        self.inject(cx, &mut carrier);
        carrier
    }

    /// Carrier keys this propagator reads and writes.
    pub fn fields(&self) -> FieldIter<'_> {
        self.inner.fields()
    }
}

impl TextMapPropagator for Propagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.inject(cx, injector)
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract(cx, extractor)
    }

    fn fields(&self) -> FieldIter<'_> {
        self.inner.fields()
    }
}
