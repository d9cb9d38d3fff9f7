//! Configuration for the three telemetry subsystems.
//!
//! Every struct implements `Default` and `serde::Deserialize` with
//! `#[serde(default)]`, so an application can fill them from any file format
//! it already parses, from the environment with `from_env`, or by hand.
//!
//! | Variable | Applies to | Meaning |
//! |---|---|---|
//! | `OTEL_SERVICE_NAME` | all | `service.name` resource attribute and log `service` field |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | all | OTLP/HTTP collector; empty selects the local sink |
//! | `OTEL_METRIC_EXPORT_INTERVAL` | metrics | export interval in milliseconds |
//! | `PLANX_LOG_LEVEL` | logs | `debug`, `info`, `warn` or `error` |
//! | `PLANX_LOG_FORMAT` | logs | `compact` (JSON lines) or `pretty` |
//! | `PLANX_LOG_OUTPUT` | logs | `stdout`, `stderr` or a file path |
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use url::Url;

use crate::conventions::DEFAULT_SERVICE_NAME;
use crate::error::InitError;
use crate::internal_logging::planx_warn;
use crate::logs::LogLevel;

pub(crate) const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub(crate) const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub(crate) const OTEL_METRIC_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
pub(crate) const PLANX_LOG_LEVEL: &str = "PLANX_LOG_LEVEL";
pub(crate) const PLANX_LOG_FORMAT: &str = "PLANX_LOG_FORMAT";
pub(crate) const PLANX_LOG_OUTPUT: &str = "PLANX_LOG_OUTPUT";

/// Default metric export interval.
pub const DEFAULT_METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Path appended to a bare OTLP/HTTP endpoint for each signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// `/v1/traces`
    Traces,
    /// `/v1/metrics`
    Metrics,
    /// `/v1/logs`
    Logs,
}

impl Signal {
    /// The OTLP/HTTP path for this signal.
    pub fn path(self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

/// Resolve a configured endpoint into the URL the OTLP/HTTP exporter posts to.
///
/// Returns `Ok(None)` when the endpoint is empty, which selects the local
/// sink. `host:port` without a scheme is treated as plain `http`. A URL with
/// no path gets the signal path appended; an explicit path is kept as is.
pub fn resolve_endpoint(endpoint: &str, signal: Signal) -> Result<Option<Url>, InitError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Ok(None);
    }

    let invalid = |reason: String| InitError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let mut url = Url::parse(&candidate).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(signal.path());
    }

    Ok(Some(url))
}

/// Reject an empty service name before any exporter is built.
pub(crate) fn validate_service_name(service_name: &str) -> Result<(), InitError> {
    if service_name.trim().is_empty() {
        return Err(InitError::Resource(
            "service name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Error returned when a textual configuration value is not recognized.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        ParseValueError {
            kind,
            value: value.to_string(),
        }
    }
}

/// Tracer provider configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `service.name` resource attribute.
    pub service_name: String,
    /// OTLP/HTTP endpoint; empty exports to stdout.
    pub endpoint: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            endpoint: String::new(),
        }
    }
}

impl TracingConfig {
    /// Defaults overridden by `OTEL_SERVICE_NAME` and
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn from_env() -> Self {
        let mut config = TracingConfig::default();
        if let Some(name) = env_var(OTEL_SERVICE_NAME) {
            config.service_name = name;
        }
        if let Some(endpoint) = env_var(OTEL_EXPORTER_OTLP_ENDPOINT) {
            config.endpoint = endpoint;
        }
        config
    }
}

/// Meter provider configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// `service.name` resource attribute.
    pub service_name: String,
    /// OTLP/HTTP endpoint; empty exports to stdout.
    pub endpoint: String,
    /// Periodic export interval, given in milliseconds when deserialized.
    #[serde(deserialize_with = "deserialize_millis")]
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            endpoint: String::new(),
            interval: DEFAULT_METRIC_EXPORT_INTERVAL,
        }
    }
}

impl MetricsConfig {
    /// Defaults overridden by `OTEL_SERVICE_NAME`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_METRIC_EXPORT_INTERVAL`.
    ///
    /// A zero or unparseable interval keeps the default and emits a warning.
    pub fn from_env() -> Self {
        let mut config = MetricsConfig::default();
        if let Some(name) = env_var(OTEL_SERVICE_NAME) {
            config.service_name = name;
        }
        if let Some(endpoint) = env_var(OTEL_EXPORTER_OTLP_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Some(raw) = env_var(OTEL_METRIC_EXPORT_INTERVAL) {
            match raw.parse::<u64>() {
                Ok(millis) if millis > 0 => config.interval = Duration::from_millis(millis),
                _ => invalid_env_value(OTEL_METRIC_EXPORT_INTERVAL, &raw),
            }
        }
        config
    }

    /// Interval handed to the periodic reader. Zero means the default.
    pub fn export_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_METRIC_EXPORT_INTERVAL
        } else {
            self.interval
        }
    }
}

/// Local log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    #[serde(alias = "json")]
    Compact,
    /// `HH:MM:SS.mmm LVL message key=value ...` for terminals.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "json" => Ok(LogFormat::Compact),
            "pretty" | "console" => Ok(LogFormat::Pretty),
            _ => Err(ParseValueError::new("log format", s)),
        }
    }
}

/// Where local log lines are written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum LogOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// A file opened in append mode, created if missing.
    File(PathBuf),
}

impl From<String> for LogOutput {
    fn from(value: String) -> Self {
        match value.trim() {
            "" | "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            path => LogOutput::File(PathBuf::from(path)),
        }
    }
}

impl fmt::Display for LogOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOutput::Stdout => f.write_str("stdout"),
            LogOutput::Stderr => f.write_str("stderr"),
            LogOutput::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Correlated logger configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Value of the `service` field on every record.
    pub service_name: String,
    /// OTLP/HTTP endpoint; when set, records are also exported as OTel logs.
    pub endpoint: String,
    /// Minimum level written.
    pub level: LogLevel,
    /// Local line format.
    pub format: LogFormat,
    /// Local destination.
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            endpoint: String::new(),
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `OTEL_SERVICE_NAME`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and the `PLANX_LOG_*` variables.
    ///
    /// Unknown level or format values keep the default and emit a warning.
    pub fn from_env() -> Self {
        let mut config = LoggingConfig::default();
        if let Some(name) = env_var(OTEL_SERVICE_NAME) {
            config.service_name = name;
        }
        if let Some(endpoint) = env_var(OTEL_EXPORTER_OTLP_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Some(raw) = env_var(PLANX_LOG_LEVEL) {
            match raw.parse() {
                Ok(level) => config.level = level,
                Err(_) => invalid_env_value(PLANX_LOG_LEVEL, &raw),
            }
        }
        if let Some(raw) = env_var(PLANX_LOG_FORMAT) {
            match raw.parse() {
                Ok(format) => config.format = format,
                Err(_) => invalid_env_value(PLANX_LOG_FORMAT, &raw),
            }
        }
        if let Some(raw) = env_var(PLANX_LOG_OUTPUT) {
            config.output = LogOutput::from(raw);
        }
        config
    }
}

/// Configuration for all three subsystems.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Traces.
    pub tracing: TracingConfig,
    /// Metrics.
    pub metrics: MetricsConfig,
    /// Logs.
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    /// Defaults with one service name applied to every subsystem.
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let mut config = TelemetryConfig::default();
        config.tracing.service_name = service_name.clone();
        config.metrics.service_name = service_name.clone();
        config.logging.service_name = service_name;
        config
    }

    /// Export every signal to the same OTLP/HTTP collector.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.tracing.endpoint = endpoint.clone();
        self.metrics.endpoint = endpoint.clone();
        self.logging.endpoint = endpoint;
        self
    }

    /// Every subsystem's `from_env`.
    pub fn from_env() -> Self {
        TelemetryConfig {
            tracing: TracingConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            logging: LoggingConfig::from_env(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn invalid_env_value(variable: &str, value: &str) {
    planx_warn!(
        name: "Config.InvalidEnvValue",
        variable = variable,
        value = value,
        message = "Value not recognized; the default is used."
    );
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("collector:4318", Signal::Traces, "http://collector:4318/v1/traces")]
    #[case("http://collector:4318", Signal::Metrics, "http://collector:4318/v1/metrics")]
    #[case("https://collector:4318/", Signal::Logs, "https://collector:4318/v1/logs")]
    #[case("http://collector:4318/custom/path", Signal::Traces, "http://collector:4318/custom/path")]
    #[case("  localhost:4318  ", Signal::Logs, "http://localhost:4318/v1/logs")]
    fn resolves_endpoints(#[case] endpoint: &str, #[case] signal: Signal, #[case] expected: &str) {
        let url = resolve_endpoint(endpoint, signal).unwrap().unwrap();
        assert_eq!(url.as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn empty_endpoint_selects_local_sink(#[case] endpoint: &str) {
        assert_eq!(resolve_endpoint(endpoint, Signal::Traces).unwrap(), None);
    }

    #[rstest]
    #[case("grpc://collector:4317")]
    #[case("ftp://collector")]
    #[case("http://")]
    #[case("http://exa mple.com")]
    fn rejects_malformed_endpoints(#[case] endpoint: &str) {
        let err = resolve_endpoint(endpoint, Signal::Traces).unwrap_err();
        assert!(
            matches!(err, InitError::InvalidEndpoint { .. }),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn empty_service_name_is_rejected() {
        assert!(validate_service_name("planx").is_ok());
        assert!(matches!(
            validate_service_name("  "),
            Err(InitError::Resource(_))
        ));
    }

    #[test]
    fn defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.tracing.service_name, "planx");
        assert_eq!(config.metrics.interval, Duration::from_secs(10));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.logging.output, LogOutput::Stdout);
        assert!(config.logging.endpoint.is_empty());
    }

    #[test]
    fn from_env_reads_all_variables() {
        temp_env::with_vars(
            [
                (OTEL_SERVICE_NAME, Some("ingest")),
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("collector:4318")),
                (OTEL_METRIC_EXPORT_INTERVAL, Some("2500")),
                (PLANX_LOG_LEVEL, Some("DEBUG")),
                (PLANX_LOG_FORMAT, Some("pretty")),
                (PLANX_LOG_OUTPUT, Some("stderr")),
            ],
            || {
                let config = TelemetryConfig::from_env();
                assert_eq!(config.tracing.service_name, "ingest");
                assert_eq!(config.metrics.service_name, "ingest");
                assert_eq!(config.logging.service_name, "ingest");
                assert_eq!(config.tracing.endpoint, "collector:4318");
                assert_eq!(config.metrics.interval, Duration::from_millis(2500));
                assert_eq!(config.logging.level, LogLevel::Debug);
                assert_eq!(config.logging.format, LogFormat::Pretty);
                assert_eq!(config.logging.output, LogOutput::Stderr);
            },
        );
    }

    #[test]
    fn from_env_falls_back_on_invalid_values() {
        temp_env::with_vars(
            [
                (OTEL_SERVICE_NAME, None),
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("")),
                (OTEL_METRIC_EXPORT_INTERVAL, Some("soon")),
                (PLANX_LOG_LEVEL, Some("verbose")),
                (PLANX_LOG_FORMAT, Some("xml")),
                (PLANX_LOG_OUTPUT, Some("/var/log/planx.log")),
            ],
            || {
                let config = TelemetryConfig::from_env();
                assert_eq!(config.tracing.service_name, "planx");
                assert!(config.metrics.endpoint.is_empty());
                assert_eq!(config.metrics.interval, DEFAULT_METRIC_EXPORT_INTERVAL);
                assert_eq!(config.logging.level, LogLevel::Info);
                assert_eq!(config.logging.format, LogFormat::Compact);
                assert_eq!(
                    config.logging.output,
                    LogOutput::File(PathBuf::from("/var/log/planx.log"))
                );
            },
        );
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: TelemetryConfig = serde_json::from_str(
            r#"{
                "metrics": { "interval": 500 },
                "logging": { "level": "warn", "format": "json", "output": "stderr" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.tracing, TracingConfig::default());
        assert_eq!(config.metrics.interval, Duration::from_millis(500));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.logging.output, LogOutput::Stderr);
    }

    #[test]
    fn zero_interval_exports_at_the_default_rate() {
        let config: MetricsConfig = serde_json::from_str(r#"{ "interval": 0 }"#).unwrap();
        assert_eq!(config.interval, Duration::ZERO);
        assert_eq!(config.export_interval(), DEFAULT_METRIC_EXPORT_INTERVAL);

        let config = MetricsConfig {
            interval: Duration::from_secs(3),
            ..MetricsConfig::default()
        };
        assert_eq!(config.export_interval(), Duration::from_secs(3));
    }

    #[test]
    fn builder_applies_to_every_subsystem() {
        let config = TelemetryConfig::new("router").with_endpoint("collector:4318");
        assert_eq!(config.metrics.service_name, "router");
        assert_eq!(config.logging.endpoint, "collector:4318");
        assert_eq!(config.tracing.endpoint, "collector:4318");
    }
}
