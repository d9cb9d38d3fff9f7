//! The trace identity carried by an [`opentelemetry::Context`].
//!
//! A context carries zero or one identity: the span context of its current
//! span, counted only when it is valid. Everything here reads the context
//! passed in; nothing consults thread-local state.
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;

/// The `(trace id, span id)` pair locating a span within its trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceIdentity {
    trace_id: TraceId,
    span_id: SpanId,
}

impl TraceIdentity {
    /// Pair an existing trace id and span id.
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        TraceIdentity { trace_id, span_id }
    }

    /// Parse lowercase hex ids as they appear in log records and carriers.
    ///
    /// Returns `None` when either id is malformed or all zeros.
    pub fn from_hex(trace_id: &str, span_id: &str) -> Option<Self> {
        let trace_id = TraceId::from_hex(trace_id).ok()?;
        let span_id = SpanId::from_hex(span_id).ok()?;
        if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
            return None;
        }
        Some(TraceIdentity { trace_id, span_id })
    }

    /// The identity of the current span in `cx`, if it has a valid one.
    pub fn from_context(cx: &Context) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| TraceIdentity::new(span_context.trace_id(), span_context.span_id()))
    }

    /// Trace id shared by every span of the trace.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Id of this span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }
}

/// Whether `cx` carries a trace identity.
pub fn has_active_span(cx: &Context) -> bool {
    TraceIdentity::from_context(cx).is_some()
}

/// Hex trace id of `cx`, or an empty string when it carries no identity.
pub fn trace_id(cx: &Context) -> String {
    TraceIdentity::from_context(cx)
        .map(|identity| identity.trace_id().to_string())
        .unwrap_or_default()
}

/// Hex span id of `cx`, or an empty string when it carries no identity.
pub fn span_id(cx: &Context) -> String {
    TraceIdentity::from_context(cx)
        .map(|identity| identity.span_id().to_string())
        .unwrap_or_default()
}

/// Attach an identity received out of band, such as ids stored with a
/// queued batch, as the remote parent of spans started from the returned
/// context.
pub fn context_with_identity(cx: &Context, identity: TraceIdentity) -> Context {
    cx.with_remote_span_context(SpanContext::new(
        identity.trace_id,
        identity.span_id,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    ))
}
