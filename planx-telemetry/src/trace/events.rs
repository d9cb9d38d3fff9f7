use opentelemetry::KeyValue;

use crate::conventions::{attribute, span};

/// A pipeline operation worth a span, with its fixed name and attribute
/// schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineEvent<'a> {
    /// A source reading one batch.
    SourceRead {
        /// Owning tenant.
        tenant_id: &'a str,
        /// Streaming session.
        session_id: &'a str,
        /// Records in the batch.
        batch_size: usize,
    },
    /// A processor transforming one batch.
    Process {
        /// Processor plugin name.
        processor: &'a str,
        /// Streaming session.
        session_id: &'a str,
        /// Records in the batch.
        batch_size: usize,
    },
    /// A sink writing one batch.
    SinkWrite {
        /// Sink plugin name.
        sink: &'a str,
        /// Streaming session.
        session_id: &'a str,
        /// Records in the batch.
        batch_size: usize,
    },
    /// The engine routing a batch between stages.
    Route {
        /// Origin stage.
        from: &'a str,
        /// Destination stage.
        to: &'a str,
    },
}

impl PipelineEvent<'_> {
    /// Span name for this event.
    pub fn span_name(&self) -> &'static str {
        match self {
            PipelineEvent::SourceRead { .. } => span::SOURCE_READ,
            PipelineEvent::Process { .. } => span::PROCESSOR_PROCESS,
            PipelineEvent::SinkWrite { .. } => span::SINK_WRITE,
            PipelineEvent::Route { .. } => span::ENGINE_ROUTE,
        }
    }

    /// Span attributes for this event.
    pub fn attributes(&self) -> Vec<KeyValue> {
        match *self {
            PipelineEvent::SourceRead {
                tenant_id,
                session_id,
                batch_size,
            } => vec![
                KeyValue::new(attribute::TENANT_ID, tenant_id.to_string()),
                KeyValue::new(attribute::SESSION_ID, session_id.to_string()),
                KeyValue::new(attribute::BATCH_SIZE, batch_size_value(batch_size)),
            ],
            PipelineEvent::Process {
                processor,
                session_id,
                batch_size,
            } => vec![
                KeyValue::new(attribute::PROCESSOR, processor.to_string()),
                KeyValue::new(attribute::SESSION_ID, session_id.to_string()),
                KeyValue::new(attribute::BATCH_SIZE, batch_size_value(batch_size)),
            ],
            PipelineEvent::SinkWrite {
                sink,
                session_id,
                batch_size,
            } => vec![
                KeyValue::new(attribute::SINK, sink.to_string()),
                KeyValue::new(attribute::SESSION_ID, session_id.to_string()),
                KeyValue::new(attribute::BATCH_SIZE, batch_size_value(batch_size)),
            ],
            PipelineEvent::Route { from, to } => vec![
                KeyValue::new(attribute::FROM, from.to_string()),
                KeyValue::new(attribute::TO, to.to_string()),
            ],
        }
    }
}

// Attribute values are i64; saturate rather than wrap.
fn batch_size_value(batch_size: usize) -> i64 {
    i64::try_from(batch_size).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Value;
    use rstest::rstest;

    #[rstest]
    #[case(PipelineEvent::SourceRead { tenant_id: "t1", session_id: "s1", batch_size: 100 }, "source.read", &["tenant_id", "session_id", "batch_size"])]
    #[case(PipelineEvent::Process { processor: "mask", session_id: "s1", batch_size: 5 }, "processor.process", &["processor", "session_id", "batch_size"])]
    #[case(PipelineEvent::SinkWrite { sink: "http", session_id: "s1", batch_size: 5 }, "sink.write", &["sink", "session_id", "batch_size"])]
    #[case(PipelineEvent::Route { from: "source", to: "sink" }, "engine.route", &["from", "to"])]
    fn fixed_names_and_keys(
        #[case] event: PipelineEvent<'static>,
        #[case] name: &str,
        #[case] keys: &[&str],
    ) {
        assert_eq!(event.span_name(), name);
        let actual: Vec<_> = event
            .attributes()
            .into_iter()
            .map(|kv| kv.key.as_str().to_string())
            .collect();
        assert_eq!(actual, keys);
    }

    #[test]
    fn batch_size_is_an_integer_attribute() {
        let attributes = PipelineEvent::SourceRead {
            tenant_id: "t1",
            session_id: "s1",
            batch_size: usize::MAX,
        }
        .attributes();
        assert_eq!(attributes[2].value, Value::I64(i64::MAX));
    }
}
