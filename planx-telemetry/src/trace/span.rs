use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::trace::{Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use opentelemetry_semantic_conventions::attribute as semconv;

use crate::conventions::attribute;
use crate::identity::TraceIdentity;
use crate::internal_logging::planx_debug;

/// An open span together with the child context that carries it.
///
/// Pass [`PipelineSpan::context`] to nested operations so their spans and log
/// records attach to this one. Closing is idempotent: the first
/// [`close`](PipelineSpan::close) ends the span and later calls do nothing.
/// A span still open when the value is dropped is closed at that point and a
/// `PipelineSpan.ClosedOnDrop` debug diagnostic is emitted.
///
/// Status is `Ok` on close unless [`record_error`](PipelineSpan::record_error)
/// was called first.
#[must_use = "a span is closed as soon as the PipelineSpan is dropped"]
pub struct PipelineSpan {
    cx: Context,
    name: Cow<'static, str>,
    errored: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for PipelineSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSpan")
            .field("name", &self.name)
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PipelineSpan {
    pub(crate) fn new(cx: Context, name: Cow<'static, str>) -> Self {
        PipelineSpan {
            cx,
            name,
            errored: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Child context: the caller's context with this span as current.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Identity of this span, `None` for spans from a degraded tracer.
    pub fn identity(&self) -> Option<TraceIdentity> {
        TraceIdentity::from_context(&self.cx)
    }

    /// Span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set or replace an attribute. Ignored once closed.
    pub fn set_attribute(&self, attribute: KeyValue) {
        if !self.is_closed() {
            self.cx.span().set_attribute(attribute);
        }
    }

    /// Add a timeline event. Ignored once closed.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        if !self.is_closed() {
            self.cx.span().add_event(name, attributes);
        }
    }

    /// Mark the span failed with `err`.
    ///
    /// Sets status `Error` with the error's message, adds an `exception`
    /// event carrying the message and a stack captured here and, when the error has sources, an `error.cause` attribute
    /// listing them. The span stays open.
    pub fn record_error(&self, err: &dyn Error) {
        if self.is_closed() {
            return;
        }
        let span = self.cx.span();
        if span.is_recording() {
            span.add_event(
                "exception",
                vec![
                    KeyValue::new(semconv::EXCEPTION_MESSAGE, err.to_string()),
                    KeyValue::new(
                        semconv::EXCEPTION_STACKTRACE,
                        Backtrace::force_capture().to_string(),
                    ),
                ],
            );
        }
        span.set_status(Status::error(err.to_string()));
        if let Some(causes) = cause_chain(err) {
            span.set_attribute(KeyValue::new(attribute::ERROR_CAUSE, causes));
        }
        self.errored.store(true, Ordering::Release);
    }

    /// Whether the span has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the span is open and sampled by a real tracer.
    pub fn is_recording(&self) -> bool {
        !self.is_closed() && self.cx.span().is_recording()
    }

    /// End the span. Later calls are no-ops and keep the original end time.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let span = self.cx.span();
        if !self.errored.load(Ordering::Acquire) {
            span.set_status(Status::Ok);
        }
        span.end();
    }
}

impl Drop for PipelineSpan {
    fn drop(&mut self) {
        if !self.is_closed() {
            planx_debug!(name: "PipelineSpan.ClosedOnDrop", span_name = self.name);
            self.close();
        }
    }
}

/// `source()` messages of `err`, outermost first, joined with `: `.
fn cause_chain(err: &dyn Error) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    (!causes.is_empty()).then(|| causes.join(": "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("write failed")]
    struct Outer(#[source] Middle);

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct Middle(#[source] std::io::Error);

    #[test]
    fn cause_chain_lists_sources_in_order() {
        let err = Outer(Middle(std::io::Error::other("peer closed")));
        assert_eq!(
            cause_chain(&err).as_deref(),
            Some("connection reset: peer closed")
        );
        assert_eq!(cause_chain(&std::io::Error::other("plain")), None);
    }

    #[test]
    fn span_without_tracer_is_inert() {
        let span = PipelineSpan::new(Context::new(), "detached".into());
        assert_eq!(span.identity(), None);
        assert!(!span.is_recording());
        span.record_error(&std::io::Error::other("ignored"));
        span.close();
        span.close();
        assert!(span.is_closed());
    }
}
