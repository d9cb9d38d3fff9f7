//! Fixed names shared by every planx component.
//!
//! Span names, attribute keys and metric names are part of the contract with
//! dashboards and alerting rules, so they live in one place.

/// Instrumentation scope used for the tracer and the meter.
pub const SCOPE_NAME: &str = "planx";

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "planx";

/// Span names.
pub mod span {
    /// A source reading one batch.
    pub const SOURCE_READ: &str = "source.read";
    /// A processor transforming one batch.
    pub const PROCESSOR_PROCESS: &str = "processor.process";
    /// A sink writing one batch.
    pub const SINK_WRITE: &str = "sink.write";
    /// The engine routing a batch between stages.
    pub const ENGINE_ROUTE: &str = "engine.route";
}

/// Attribute keys used on spans, log records and metric points.
pub mod attribute {
    /// Tenant owning the pipeline.
    pub const TENANT_ID: &str = "tenant_id";
    /// Streaming session carrying the batch.
    pub const SESSION_ID: &str = "session_id";
    /// Number of records in the batch.
    pub const BATCH_SIZE: &str = "batch_size";
    /// Processor plugin name.
    pub const PROCESSOR: &str = "processor";
    /// Sink plugin name.
    pub const SINK: &str = "sink";
    /// Routing origin stage.
    pub const FROM: &str = "from";
    /// Routing destination stage.
    pub const TO: &str = "to";
    /// Pipeline stage (`source`, `processor`, `sink`, ...).
    pub const STAGE: &str = "stage";
    /// Plugin type (`mysql`, `http`, ...).
    pub const PLUGIN_TYPE: &str = "plugin_type";
    /// Coarse error category.
    pub const ERROR_TYPE: &str = "error_type";
    /// `source()` chain of an error recorded on a span.
    pub const ERROR_CAUSE: &str = "error.cause";
    /// Trace id field appended to correlated log records.
    pub const TRACE_ID: &str = "trace_id";
    /// Span id field appended to correlated log records.
    pub const SPAN_ID: &str = "span_id";
}

/// Metric instrument names.
pub mod metric {
    /// Batches handed to the next stage.
    pub const BATCHES_SENT: &str = "planx.batches.sent";
    /// Batches accepted from the previous stage.
    pub const BATCHES_RECEIVED: &str = "planx.batches.received";
    /// Records handed to the next stage.
    pub const RECORDS_SENT: &str = "planx.records.sent";
    /// Records accepted from the previous stage.
    pub const RECORDS_RECEIVED: &str = "planx.records.received";
    /// Errors by category.
    pub const ERRORS_TOTAL: &str = "planx.errors.total";
    /// Per-stage processing latency.
    pub const STAGE_LATENCY: &str = "planx.stage.latency";
    /// Time from send to acknowledgement.
    pub const ACK_LATENCY: &str = "planx.ack.latency";
    /// Batches waiting in a stage's window.
    pub const WINDOW_BACKLOG: &str = "planx.window.backlog";
    /// Open streaming sessions.
    pub const SESSIONS_ACTIVE: &str = "planx.sessions.active";
    /// Batches sent but not yet acknowledged.
    pub const BATCHES_INFLIGHT: &str = "planx.batches.inflight";
}
