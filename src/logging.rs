//! Tracing setup, plus a layer that hands every event to a plain string
//! callback for embedders that only want lines of text.

use std::{fmt, fmt::Write as _, sync::Arc};

use anyhow::Result;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{layer, prelude::*, EnvFilter, Layer};

/// Receives one rendered line per log event.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Renders events as `LEVEL target: message k=v` and passes them to a
/// [`LogSink`].
#[derive(Clone)]
pub struct SinkLayer {
    sink: LogSink,
}

impl fmt::Debug for SinkLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkLayer").finish_non_exhaustive()
    }
}

impl SinkLayer {
    /// Wrap a sink.
    pub fn new(sink: LogSink) -> Self {
        SinkLayer { sink }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);

        let meta = event.metadata();
        (self.sink)(&format!("{} {}: {}{}", meta.level(), meta.target(), line.message, line.fields));
    }
}

/// Install the global subscriber: `RUST_LOG` if set, else `info` (`debug`
/// with `debug`), printed as text or JSON on stderr, and mirrored to `sink`.
pub fn init_tracing(json: bool, debug: bool, sink: Option<LogSink>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(sink.map(SinkLayer::new))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_sink_layer_renders_lines() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let collected = lines.clone();
        let sink: LogSink = Arc::new(move |line| collected.lock().unwrap().push(line.to_string()));

        let subscriber = tracing_subscriber::registry().with(SinkLayer::new(sink));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(peer = "10.0.0.2", "command client connected");
            tracing::warn!(rate = 100, "injected fault");
        });

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("INFO "), "{}", lines[0]);
        assert!(lines[0].ends_with(": command client connected peer=10.0.0.2"), "{}", lines[0]);
        assert!(lines[1].starts_with("WARN "));
        assert!(lines[1].ends_with("injected fault rate=100"));
    }
}
