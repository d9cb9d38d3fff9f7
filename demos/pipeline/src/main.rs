//! Runs one batch through source → processor → sink with full correlation.
//!
//! The source and sink sides only share a carrier map, the way two engine
//! processes would share message headers. Configure with the usual
//! variables, e.g. `OTEL_EXPORTER_OTLP_ENDPOINT=localhost:4318` or
//! `PLANX_LOG_FORMAT=pretty`.
use std::collections::HashMap;
use std::error::Error;
use std::time::{Duration, Instant};

use opentelemetry::{Context, KeyValue};
use planx_telemetry::logs::add_span_event_with_attributes;
use planx_telemetry::{PipelineError, Telemetry, TelemetryConfig};
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

const TENANT: &str = "tenant-1";
const SESSION: &str = "session-42";

fn main() -> Result<(), Box<dyn Error>> {
    let telemetry = Telemetry::new(TelemetryConfig::from_env());
    if let Err(err) = telemetry.init() {
        eprintln!("telemetry degraded: {err}");
    }

    let diagnostics = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(Targets::new().with_target("planx-telemetry", Level::INFO));
    tracing_subscriber::registry()
        .with(diagnostics)
        .with(telemetry.logging().tracing_bridge())
        .init();

    let batch: Vec<String> = (0..8).map(|i| format!("row-{i}")).collect();

    let carrier = read_and_process(&telemetry, &batch);
    tracing::info!(target: "pipeline-demo", fields = carrier.len(), "batch handed to sink");
    write(&telemetry, &carrier, &batch);

    telemetry.shutdown()?;
    Ok(())
}

/// Source side: read, mask, then serialize the identity for the sink.
fn read_and_process(telemetry: &Telemetry, batch: &[String]) -> HashMap<String, String> {
    let recorder = telemetry.recorder();
    let logging = telemetry.logging();
    let started = Instant::now();

    let read = telemetry
        .tracing()
        .start_source_read(&Context::new(), TENANT, SESSION, batch.len());
    logging.info(
        read.context(),
        "batch read",
        &[KeyValue::new("tenant_id", TENANT)],
    );

    let process = telemetry
        .tracing()
        .start_processor(read.context(), "mask", SESSION, batch.len());
    let masked = batch.iter().filter(|row| row.ends_with('3')).count();
    add_span_event_with_attributes(
        process.context(),
        "fields masked",
        &[KeyValue::new("rows", masked as i64)],
    );
    process.close();

    let route = telemetry
        .tracing()
        .start_route(read.context(), "processor", "sink");
    let carrier = telemetry.propagator().to_carrier(route.context());
    route.close();

    recorder.record_batch_sent(TENANT, "source", "mysql", batch.len() as u64);
    recorder.update_inflight_batches(1);
    recorder.update_window_backlog("source", 1);
    recorder.record_stage_latency("source", started.elapsed());
    read.close();

    carrier
}

/// Sink side: continue the trace from the carrier and write the batch.
fn write(telemetry: &Telemetry, carrier: &HashMap<String, String>, batch: &[String]) {
    let recorder = telemetry.recorder();
    let logging = telemetry.logging();
    let started = Instant::now();

    let cx = telemetry.propagator().extract(&Context::new(), carrier);
    let span = telemetry
        .tracing()
        .start_sink_write(&cx, "http", SESSION, batch.len());
    recorder.record_batch_received(TENANT, "sink", "http", batch.len() as u64);
    recorder.update_window_backlog("source", -1);

    let rejected: Vec<usize> = batch
        .iter()
        .enumerate()
        .filter(|(_, row)| row.ends_with('5'))
        .map(|(index, _)| index)
        .collect();

    if rejected.is_empty() {
        logging.info(span.context(), "batch written", &[KeyValue::new("sink", "http")]);
    } else {
        let err = PipelineError::batch("upstream rejected records", rejected);
        span.record_error(&err);
        recorder.record_error(TENANT, "sink", err.kind());
        logging.error(
            span.context(),
            &err.to_string(),
            &[KeyValue::new("failed", err.failed_indices().len() as i64)],
        );
    }

    std::thread::sleep(Duration::from_millis(5));
    recorder.record_stage_latency("sink", started.elapsed());
    recorder.record_ack_latency(started.elapsed());
    recorder.update_inflight_batches(-1);
    span.close();
}
