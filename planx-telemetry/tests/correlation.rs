use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use opentelemetry::logs::AnyValue;
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use planx_telemetry::config::LoggingConfig;
use planx_telemetry::identity::{self, TraceIdentity};
use planx_telemetry::logs::{add_span_event, add_span_event_with_attributes, Logging};
use planx_telemetry::propagation::Propagator;
use planx_telemetry::trace::Tracing;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn json_lines(&self) -> Vec<serde_json::Value> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn tracing_in_memory() -> (Tracing, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (Tracing::from_provider(provider), exporter)
}

fn logging_in_memory() -> (Logging, Buffer, InMemoryLogExporter) {
    let buffer = Buffer::default();
    let exporter = InMemoryLogExporter::default();
    let provider = SdkLoggerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let logging = Logging::builder(&LoggingConfig::default())
        .with_writer(buffer.clone())
        .with_logger_provider(provider)
        .build()
        .unwrap();
    (logging, buffer, exporter)
}

#[test]
fn log_records_carry_the_active_span_identity() {
    let (tracing, _spans) = tracing_in_memory();
    let (logging, buffer, _logs) = logging_in_memory();

    let span = tracing.start_source_read(&Context::new(), "t1", "s1", 100);
    let expected = span.identity().unwrap();
    logging.info(span.context(), "batch read", &[KeyValue::new("tenant_id", "t1")]);
    logging.info(&Context::new(), "no span", &[]);
    span.close();

    let lines = buffer.json_lines();
    assert_eq!(lines[0]["trace_id"], expected.trace_id().to_string());
    assert_eq!(lines[0]["span_id"], expected.span_id().to_string());
    assert_eq!(lines[0]["fields"], "tenant_id=t1");
    assert!(lines[1].get("trace_id").is_none());
}

#[test]
fn exported_log_records_carry_trace_context() {
    let (tracing, _spans) = tracing_in_memory();
    let (logging, _buffer, exporter) = logging_in_memory();

    let span = tracing.start_sink_write(&Context::new(), "http", "s1", 10);
    let expected = span.identity().unwrap();
    logging.warn(span.context(), "slow ack", &[KeyValue::new("sink", "http")]);
    logging.warn(&Context::new(), "detached", &[]);
    span.close();

    let emitted = exporter.get_emitted_logs().unwrap();
    assert_eq!(emitted.len(), 2);

    let correlated = &emitted[0].record;
    let trace_context = correlated.trace_context().unwrap();
    assert_eq!(trace_context.trace_id, expected.trace_id());
    assert_eq!(trace_context.span_id, expected.span_id());
    assert_eq!(correlated.body(), Some(&AnyValue::from("slow ack".to_string())));

    assert!(emitted[1].record.trace_context().is_none());
}

#[test]
fn identity_survives_a_process_hop() {
    let propagator = Propagator::new();
    let (upstream, _) = tracing_in_memory();
    let (downstream, downstream_spans) = tracing_in_memory();

    let route = upstream.start_route(&Context::new(), "source", "sink");
    let sent = route.identity().unwrap();
    let carrier: HashMap<String, String> = propagator.to_carrier(route.context());
    route.close();

    let received = propagator.extract(&Context::new(), &carrier);
    assert_eq!(
        TraceIdentity::from_context(&received).map(|id| id.trace_id()),
        Some(sent.trace_id())
    );

    let write = downstream.start_sink_write(&received, "http", "s1", 5);
    assert_eq!(write.identity().unwrap().trace_id(), sent.trace_id());
    write.close();

    let spans = downstream_spans.get_finished_spans().unwrap();
    assert_eq!(spans[0].parent_span_id, sent.span_id());
}

#[test]
fn extracting_an_empty_carrier_keeps_the_input_context() {
    let propagator = Propagator::new();
    let extracted = propagator.extract(&Context::new(), &HashMap::<String, String>::new());
    assert!(!identity::has_active_span(&extracted));
    assert_eq!(identity::trace_id(&extracted), "");
}

#[test]
fn span_events_bridge_into_the_recording_span() {
    let (tracing, exporter) = tracing_in_memory();
    let span = tracing.start_processor(&Context::new(), "mask", "s1", 3);

    add_span_event(span.context(), "masking started");
    add_span_event_with_attributes(
        span.context(),
        "masked",
        &[KeyValue::new("fields", 2_i64)],
    );
    span.close();

    let spans = exporter.get_finished_spans().unwrap();
    let names: Vec<_> = spans[0]
        .events
        .events
        .iter()
        .map(|event| event.name.to_string())
        .collect();
    assert_eq!(names, ["masking started", "masked"]);
    assert_eq!(spans[0].events.events[1].attributes, vec![KeyValue::new("fields", 2_i64)]);
}

#[test]
fn tracing_bridge_forwards_engine_events() {
    let (logging, _buffer, exporter) = logging_in_memory();
    let bridge = logging.tracing_bridge().unwrap();
    let subscriber = tracing_subscriber::registry().with(bridge);

    tracing::subscriber::with_default(subscriber, || {
        tracing::warn!(target: "planx_engine", stage = "sink", "window full");
    });

    let emitted = exporter.get_emitted_logs().unwrap();
    assert!(emitted
        .iter()
        .any(|log| log.record.body() == Some(&AnyValue::from("window full".to_string()))));
}

#[test]
fn tracing_bridge_drops_exporter_chatter_and_low_levels() {
    let (logging, _buffer, exporter) = logging_in_memory();
    let bridge = logging.tracing_bridge().unwrap();
    let subscriber = tracing_subscriber::registry().with(bridge);

    tracing::subscriber::with_default(subscriber, || {
        tracing::warn!(target: "hyper::client::pool", "connection reset");
        tracing::warn!(target: "opentelemetry_sdk", "export failed");
        tracing::warn!(target: "planx-telemetry", "Logging.FlushFailed");
        tracing::debug!(target: "planx_engine", "window polled");
        tracing::error!(target: "planx_engine", "sink rejected batch");
    });

    let bodies: Vec<_> = exporter
        .get_emitted_logs()
        .unwrap()
        .iter()
        .map(|log| log.record.body().cloned())
        .collect();
    assert_eq!(
        bodies,
        [Some(AnyValue::from("sink rejected batch".to_string()))]
    );
}

#[test]
fn logger_without_otel_pipeline_has_no_bridge() {
    let logging = Logging::builder(&LoggingConfig::default())
        .with_writer(std::io::sink())
        .build()
        .unwrap();
    assert!(logging
        .tracing_bridge::<tracing_subscriber::Registry>()
        .is_none());
    assert!(logging.logger_provider().is_none());
}

#[test]
fn records_after_close_keep_the_last_identity() {
    let (tracing, _spans) = tracing_in_memory();
    let (logging, buffer, _logs) = logging_in_memory();

    let span = tracing.start_route(&Context::new(), "processor", "sink");
    let expected = span.identity().unwrap();
    span.close();
    logging.warn(span.context(), "late ack", &[]);

    let lines = buffer.json_lines();
    assert_eq!(lines[0]["trace_id"], expected.trace_id().to_string());
    assert_eq!(lines[0]["span_id"], expected.span_id().to_string());
}
