//! Human-readable rendering of engine events and tracing initialization.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::events::EngineEvent;

/// Renders an engine event to a single display line.
pub trait EventFormatter: Send + Sync {
    fn render(&self, event: &EngineEvent) -> String;
}

/// Default formatter: the event's `Display` form.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl EventFormatter for PlainFormatter {
    fn render(&self, event: &EngineEvent) -> String {
        event.to_string()
    }
}

/// Compact JSON formatter for log shippers.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn render(&self, event: &EngineEvent) -> String {
        event.to_json_value().to_string()
    }
}

/// Install a global tracing subscriber with env-filter support and span
/// traces on errors.
///
/// Reads `RUST_LOG` (default `info`). Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}
