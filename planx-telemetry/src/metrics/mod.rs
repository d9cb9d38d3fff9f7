//! Pipeline metric instruments.
//!
//! [`MetricsProvider`] owns the meter provider. The instruments are
//! registered once when it becomes ready; until then
//! [`MetricsProvider::recorder`] hands out a recorder that drops every
//! measurement without blocking. Taking a recorder never initializes the
//! provider.
//!
//! | Name | Kind | Attributes |
//! |---|---|---|
//! | `planx.batches.sent`, `planx.batches.received` | counter | `tenant_id`, `stage`, `plugin_type` |
//! | `planx.records.sent`, `planx.records.received` | counter | `tenant_id`, `stage`, `plugin_type` |
//! | `planx.errors.total` | counter | `tenant_id`, `stage`, `error_type` |
//! | `planx.stage.latency` | histogram (ms) | `stage` |
//! | `planx.ack.latency` | histogram (ms) | |
//! | `planx.window.backlog` | up/down counter | `stage` |
//! | `planx.sessions.active` | up/down counter | `plugin_type` |
//! | `planx.batches.inflight` | up/down counter | |
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::global;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use crate::config::{resolve_endpoint, MetricsConfig, Signal};
use crate::conventions::SCOPE_NAME;
use crate::error::{InitError, ShutdownError};
use crate::internal_logging::{planx_info, planx_warn};
use crate::provider::{build_resource, InitOrigin, ProviderCell, ProviderStatus};

mod instruments;

pub use instruments::{MetricsRecorder, PipelineInstruments};

/// Handle to an initialized (or degraded) meter provider.
#[derive(Debug)]
pub struct Metrics {
    provider: Option<SdkMeterProvider>,
    instruments: Option<PipelineInstruments>,
    is_shutdown: AtomicBool,
}

impl Metrics {
    /// Build the meter provider described by `config` and register the
    /// instruments.
    pub fn from_config(config: &MetricsConfig) -> Result<Self, InitError> {
        let builder = SdkMeterProvider::builder().with_resource(build_resource(&config.service_name)?);
        let interval = config.export_interval();

        let provider = match resolve_endpoint(&config.endpoint, Signal::Metrics)? {
            Some(url) => {
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_http()
                    .with_endpoint(url.as_str())
                    .build()
                    .map_err(|err| InitError::exporter(Signal::Metrics.as_str(), err))?;
                planx_info!(name: "Metrics.OtlpExporter", endpoint = url);
                builder
                    .with_reader(PeriodicReader::builder(exporter).with_interval(interval).build())
                    .build()
            }
            None => builder
                .with_reader(
                    PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                        .with_interval(interval)
                        .build(),
                )
                .build(),
        };

        Ok(Metrics::from_provider(provider))
    }

    /// Wrap an already built provider, for custom readers and tests.
    pub fn from_provider(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter(SCOPE_NAME);
        Metrics {
            instruments: Some(PipelineInstruments::new(&meter)),
            provider: Some(provider),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// A handle whose recorder drops everything.
    pub fn noop() -> Self {
        Metrics {
            provider: None,
            instruments: None,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Whether this handle exports nothing.
    pub fn is_noop(&self) -> bool {
        self.provider.is_none()
    }

    /// The SDK provider behind this handle.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.provider.as_ref()
    }

    /// Recorder bound to this handle's instruments.
    pub fn recorder(&self) -> MetricsRecorder<'_> {
        MetricsRecorder::new(self.instruments.as_ref())
    }

    /// Collect and export now instead of waiting for the next interval.
    pub fn force_flush(&self) -> Result<(), ShutdownError> {
        match &self.provider {
            Some(provider) if !self.is_shutdown.load(Ordering::Acquire) => provider
                .force_flush()
                .map_err(|err| ShutdownError::from_sdk("metrics", err)),
            _ => Ok(()),
        }
    }

    /// Flush and release the reader. Only the first call does any work.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(provider) = &self.provider else {
            return Ok(());
        };
        if let Err(err) = provider.force_flush() {
            planx_warn!(name: "Metrics.FlushFailed", error = err);
        }
        provider
            .shutdown()
            .map_err(|err| ShutdownError::from_sdk("metrics", err))
    }

    fn register_global(&self) {
        if let Some(provider) = &self.provider {
            global::set_meter_provider(provider.clone());
        }
    }
}

/// Owner of the process's [`Metrics`] handle.
#[derive(Debug)]
pub struct MetricsProvider {
    baseline: MetricsConfig,
    cell: ProviderCell<Metrics>,
}

impl Default for MetricsProvider {
    fn default() -> Self {
        MetricsProvider::new(MetricsConfig::default())
    }
}

impl MetricsProvider {
    /// An uninitialized provider that falls back to `baseline` on first use.
    pub fn new(baseline: MetricsConfig) -> Self {
        MetricsProvider {
            baseline,
            cell: ProviderCell::new("metrics"),
        }
    }

    /// Initialize from `config` and register the meter provider globally.
    /// Only the first initialization takes effect.
    pub fn init(&self, config: &MetricsConfig) -> Result<(), InitError> {
        self.cell.init_with(
            InitOrigin::Explicit,
            || Metrics::from_config(config).map(registered),
            Metrics::noop,
        )
    }

    /// Initialize with a pre-built handle.
    pub fn install(&self, metrics: Metrics) -> Result<(), InitError> {
        self.cell
            .init_with(InitOrigin::Explicit, || Ok(registered(metrics)), Metrics::noop)
    }

    /// The handle, initializing with the baseline configuration if needed.
    pub fn get(&self) -> &Metrics {
        self.cell.get_or_init_with(
            || Metrics::from_config(&self.baseline).map(registered),
            Metrics::noop,
        )
    }

    /// A recorder for the current state. Before initialization it drops
    /// every measurement; it never triggers initialization.
    pub fn recorder(&self) -> MetricsRecorder<'_> {
        self.cell
            .get()
            .map_or_else(MetricsRecorder::noop, Metrics::recorder)
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
        self.cell.get().map_or(Ok(()), Metrics::shutdown)
    }
}

fn registered(metrics: Metrics) -> Metrics {
    metrics.register_global();
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;

    fn in_memory() -> (Metrics, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_periodic_exporter(exporter.clone())
            .build();
        (Metrics::from_provider(provider), exporter)
    }

    fn u64_sum(metrics: &[ResourceMetrics], name: &str, attributes: &[KeyValue]) -> Option<u64> {
        let mut wanted: Vec<_> = attributes.to_vec();
        wanted.sort_by(|a, b| a.key.cmp(&b.key));
        metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .filter(|metric| metric.name() == name)
            .find_map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
                    .data_points()
                    .find(|dp| {
                        let mut actual: Vec<_> = dp.attributes().cloned().collect();
                        actual.sort_by(|a, b| a.key.cmp(&b.key));
                        actual == wanted
                    })
                    .map(|dp| dp.value()),
                _ => None,
            })
    }

    fn flow(tenant: &str, stage: &str, plugin: &str) -> Vec<KeyValue> {
        vec![
            KeyValue::new("tenant_id", tenant.to_string()),
            KeyValue::new("stage", stage.to_string()),
            KeyValue::new("plugin_type", plugin.to_string()),
        ]
    }

    #[test]
    fn batch_counters_are_tagged_per_flow() {
        let (metrics, exporter) = in_memory();
        let recorder = metrics.recorder();
        recorder.record_batch_sent("t1", "source", "mysql", 100);
        recorder.record_batch_received("t1", "sink", "http", 100);
        metrics.force_flush().unwrap();

        let exported = exporter.get_finished_metrics().unwrap();
        let sent = flow("t1", "source", "mysql");
        let received = flow("t1", "sink", "http");
        assert_eq!(u64_sum(&exported, "planx.batches.sent", &sent), Some(1));
        assert_eq!(u64_sum(&exported, "planx.records.sent", &sent), Some(100));
        assert_eq!(u64_sum(&exported, "planx.batches.received", &received), Some(1));
        assert_eq!(u64_sum(&exported, "planx.records.received", &received), Some(100));
        assert_eq!(u64_sum(&exported, "planx.batches.sent", &received), None);
        assert_eq!(
            u64_sum(&exported, "planx.batches.sent", &flow("t2", "source", "mysql")),
            None
        );
    }

    #[test]
    fn stage_latency_is_recorded_in_milliseconds() {
        let (metrics, exporter) = in_memory();
        metrics
            .recorder()
            .record_stage_latency("processor", Duration::from_millis(12));
        metrics.force_flush().unwrap();

        let exported = exporter.get_finished_metrics().unwrap();
        let histogram_sum = exported
            .iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .filter(|metric| metric.name() == "planx.stage.latency")
            .find_map(|metric| match metric.data() {
                AggregatedMetrics::F64(MetricData::Histogram(histogram)) => histogram
                    .data_points()
                    .next()
                    .map(|dp| (dp.count(), dp.sum())),
                _ => None,
            });
        assert_eq!(histogram_sum, Some((1, 12.0)));
    }

    #[test]
    fn recorder_before_init_is_noop_and_does_not_initialize() {
        let provider = MetricsProvider::default();
        let recorder = provider.recorder();
        assert!(!recorder.is_enabled());
        recorder.record_error("t1", "sink", "transport");
        assert_eq!(provider.status(), ProviderStatus::Uninitialized);
    }

    #[test]
    fn installed_handle_enables_recorder() {
        let (metrics, _exporter) = in_memory();
        let provider = MetricsProvider::default();
        provider.install(metrics).unwrap();

        assert!(provider.recorder().is_enabled());
        assert_eq!(provider.status(), ProviderStatus::Ready);
        assert!(provider.shutdown().is_ok());
        assert!(provider.shutdown().is_ok());
    }

    #[test]
    fn builds_from_config_for_both_sinks() {
        let local = Metrics::from_config(&MetricsConfig {
            interval: Duration::ZERO,
            ..MetricsConfig::default()
        })
        .unwrap();
        assert!(!local.is_noop());
        assert!(local.recorder().is_enabled());
        assert!(local.shutdown().is_ok());

        let remote = Metrics::from_config(&MetricsConfig {
            endpoint: "localhost:4318".into(),
            ..MetricsConfig::default()
        })
        .unwrap();
        assert!(!remote.is_noop());
    }

    #[test]
    fn invalid_endpoint_degrades() {
        let provider = MetricsProvider::default();
        let config = MetricsConfig {
            endpoint: "ftp://collector".into(),
            ..MetricsConfig::default()
        };

        assert!(provider.init(&config).is_err());
        assert_eq!(provider.status(), ProviderStatus::Degraded);
        assert!(!provider.recorder().is_enabled());
        assert!(provider.get().force_flush().is_ok());
    }
}
