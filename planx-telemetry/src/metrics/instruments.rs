use std::fmt;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;

use crate::conventions::{attribute, metric};

/// Every pipeline instrument, registered once against a meter.
#[derive(Clone)]
pub struct PipelineInstruments {
    batches_sent: Counter<u64>,
    batches_received: Counter<u64>,
    records_sent: Counter<u64>,
    records_received: Counter<u64>,
    errors_total: Counter<u64>,
    stage_latency: Histogram<f64>,
    ack_latency: Histogram<f64>,
    window_backlog: UpDownCounter<i64>,
    sessions_active: UpDownCounter<i64>,
    batches_inflight: UpDownCounter<i64>,
}

impl fmt::Debug for PipelineInstruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineInstruments").finish_non_exhaustive()
    }
}

impl PipelineInstruments {
    /// Register the instruments on `meter`.
    pub fn new(meter: &Meter) -> Self {
        PipelineInstruments {
            batches_sent: meter
                .u64_counter(metric::BATCHES_SENT)
                .with_description("Total batches sent")
                .build(),
            batches_received: meter
                .u64_counter(metric::BATCHES_RECEIVED)
                .with_description("Total batches received")
                .build(),
            records_sent: meter
                .u64_counter(metric::RECORDS_SENT)
                .with_description("Total records sent")
                .build(),
            records_received: meter
                .u64_counter(metric::RECORDS_RECEIVED)
                .with_description("Total records received")
                .build(),
            errors_total: meter
                .u64_counter(metric::ERRORS_TOTAL)
                .with_description("Total errors")
                .build(),
            stage_latency: meter
                .f64_histogram(metric::STAGE_LATENCY)
                .with_description("Stage processing latency in milliseconds")
                .with_unit("ms")
                .build(),
            ack_latency: meter
                .f64_histogram(metric::ACK_LATENCY)
                .with_description("ACK latency in milliseconds")
                .with_unit("ms")
                .build(),
            window_backlog: meter
                .i64_up_down_counter(metric::WINDOW_BACKLOG)
                .with_description("Window backlog (in-flight batches)")
                .build(),
            sessions_active: meter
                .i64_up_down_counter(metric::SESSIONS_ACTIVE)
                .with_description("Active sessions")
                .build(),
            batches_inflight: meter
                .i64_up_down_counter(metric::BATCHES_INFLIGHT)
                .with_description("In-flight batches")
                .build(),
        }
    }
}

/// Records pipeline measurements.
///
/// A recorder taken before the meter provider is ready holds no instruments
/// and every call is a no-op. Attributes are limited to the coarse
/// dimensions below; per-record or per-session identifiers never become
/// metric attributes.
#[derive(Clone, Copy, Debug)]
pub struct MetricsRecorder<'a> {
    instruments: Option<&'a PipelineInstruments>,
}

impl<'a> MetricsRecorder<'a> {
    pub(crate) fn new(instruments: Option<&'a PipelineInstruments>) -> Self {
        MetricsRecorder { instruments }
    }

    /// A recorder that drops everything.
    pub fn noop() -> Self {
        MetricsRecorder { instruments: None }
    }

    /// Whether measurements reach a meter.
    pub fn is_enabled(&self) -> bool {
        self.instruments.is_some()
    }

    /// One batch of `records` records handed to the next stage.
    pub fn record_batch_sent(&self, tenant_id: &str, stage: &str, plugin_type: &str, records: u64) {
        if let Some(instruments) = self.instruments {
            let attributes = flow_attributes(tenant_id, stage, plugin_type);
            instruments.batches_sent.add(1, &attributes);
            instruments.records_sent.add(records, &attributes);
        }
    }

    /// One batch of `records` records accepted from the previous stage.
    pub fn record_batch_received(
        &self,
        tenant_id: &str,
        stage: &str,
        plugin_type: &str,
        records: u64,
    ) {
        if let Some(instruments) = self.instruments {
            let attributes = flow_attributes(tenant_id, stage, plugin_type);
            instruments.batches_received.add(1, &attributes);
            instruments.records_received.add(records, &attributes);
        }
    }

    /// Time a stage spent on one batch.
    pub fn record_stage_latency(&self, stage: &str, latency: Duration) {
        if let Some(instruments) = self.instruments {
            instruments.stage_latency.record(
                millis(latency),
                &[KeyValue::new(attribute::STAGE, stage.to_string())],
            );
        }
    }

    /// Time from sending a batch to its acknowledgement.
    pub fn record_ack_latency(&self, latency: Duration) {
        if let Some(instruments) = self.instruments {
            instruments.ack_latency.record(millis(latency), &[]);
        }
    }

    /// One error of category `error_type`, usually
    /// [`PipelineError::kind`](crate::pipeline_error::PipelineError::kind).
    pub fn record_error(&self, tenant_id: &str, stage: &str, error_type: &str) {
        if let Some(instruments) = self.instruments {
            instruments.errors_total.add(
                1,
                &[
                    KeyValue::new(attribute::TENANT_ID, tenant_id.to_string()),
                    KeyValue::new(attribute::STAGE, stage.to_string()),
                    KeyValue::new(attribute::ERROR_TYPE, error_type.to_string()),
                ],
            );
        }
    }

    /// Change the number of batches waiting in `stage`'s window.
    pub fn update_window_backlog(&self, stage: &str, delta: i64) {
        if let Some(instruments) = self.instruments {
            instruments
                .window_backlog
                .add(delta, &[KeyValue::new(attribute::STAGE, stage.to_string())]);
        }
    }

    /// Change the number of open sessions of `plugin_type`.
    pub fn update_sessions_active(&self, plugin_type: &str, delta: i64) {
        if let Some(instruments) = self.instruments {
            instruments.sessions_active.add(
                delta,
                &[KeyValue::new(attribute::PLUGIN_TYPE, plugin_type.to_string())],
            );
        }
    }

    /// Change the number of batches awaiting acknowledgement.
    pub fn update_inflight_batches(&self, delta: i64) {
        if let Some(instruments) = self.instruments {
            instruments.batches_inflight.add(delta, &[]);
        }
    }
}

fn flow_attributes(tenant_id: &str, stage: &str, plugin_type: &str) -> [KeyValue; 3] {
    [
        KeyValue::new(attribute::TENANT_ID, tenant_id.to_string()),
        KeyValue::new(attribute::STAGE, stage.to_string()),
        KeyValue::new(attribute::PLUGIN_TYPE, plugin_type.to_string()),
    ]
}

fn millis(latency: Duration) -> f64 {
    latency.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_recorder_accepts_everything() {
        let recorder = MetricsRecorder::noop();
        assert!(!recorder.is_enabled());
        recorder.record_batch_sent("t1", "source", "mysql", 100);
        recorder.record_batch_received("t1", "sink", "http", 100);
        recorder.record_stage_latency("source", Duration::from_millis(3));
        recorder.record_ack_latency(Duration::from_millis(3));
        recorder.record_error("t1", "sink", "transport");
        recorder.update_window_backlog("source", 1);
        recorder.update_sessions_active("mysql", -1);
        recorder.update_inflight_batches(2);
    }

    #[test]
    fn latency_in_milliseconds() {
        assert_eq!(millis(Duration::from_micros(2500)), 2.5);
    }
}
