//! Self-diagnostics for the telemetry layer.
//!
//! These macros emit `tracing` events under the `planx-telemetry` target so a
//! host application can see what the telemetry layer itself is doing
//! (initialization outcomes, dropped records, ignored configuration) through
//! whatever `tracing` subscriber it already runs. They are not meant for
//! pipeline application logging; use [`crate::logs::Logging`] for that.
//!
//! Every event carries its `name` both as the `tracing` event name and as a
//! field, because `tracing_subscriber::fmt` does not print event names.
//! Values are recorded with their `Display` implementation.

/// Debug-level diagnostic.
///
/// ```ignore
/// planx_debug!(name: "PipelineSpan.ClosedOnDrop", span_name = name);
/// ```
macro_rules! planx_debug {
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::debug!(
            name: $name,
            target: env!("CARGO_PKG_NAME"),
            name = $name,
            $($key = %$value),+
        )
    };
}

/// Info-level diagnostic.
macro_rules! planx_info {
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::info!(
            name: $name,
            target: env!("CARGO_PKG_NAME"),
            name = $name,
            $($key = %$value),+
        )
    };
}

/// Warning diagnostic. Used when configuration is ignored or replaced by a
/// default.
macro_rules! planx_warn {
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::warn!(
            name: $name,
            target: env!("CARGO_PKG_NAME"),
            name = $name,
            $($key = %$value),+
        )
    };
}

/// Error diagnostic. Used when a subsystem degrades or a record is lost.
macro_rules! planx_error {
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::error!(
            name: $name,
            target: env!("CARGO_PKG_NAME"),
            name = $name,
            $($key = %$value),+
        )
    };
}

pub(crate) use planx_debug;
pub(crate) use planx_error;
pub(crate) use planx_info;
pub(crate) use planx_warn;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Default, Clone)]
    struct Captured(Arc<Mutex<Vec<(String, String, Vec<(String, String)>)>>>);

    struct FieldVisitor(Vec<(String, String)>);

    impl Visit for FieldVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = FieldVisitor(Vec::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push((
                event.metadata().target().to_string(),
                event.metadata().level().to_string(),
                visitor.0,
            ));
        }
    }

    #[test]
    fn diagnostics_use_crate_target_and_name_field() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());

        tracing::subscriber::with_default(subscriber, || {
            planx_warn!(name: "Provider.ExplicitConfigIgnored", subsystem = "traces");
            planx_debug!(name: "Test.Detail", batch_size = 3);
        });

        let events = captured.0.lock().unwrap();
        assert_eq!(events.len(), 2);

        let (target, level, fields) = &events[0];
        assert_eq!(target, "planx-telemetry");
        assert_eq!(level, "WARN");
        assert!(fields
            .iter()
            .any(|(k, v)| k == "name" && v == "\"Provider.ExplicitConfigIgnored\""));
        assert!(fields.iter().any(|(k, v)| k == "subsystem" && v == "traces"));

        assert_eq!(events[1].1, "DEBUG");
        assert!(events[1].2.iter().any(|(k, v)| k == "batch_size" && v == "3"));
    }
}
