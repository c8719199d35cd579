//! Log routing for embedders.
//!
//! The surface can either install a standard formatting subscriber or
//! forward every event to a caller-provided sink. The active level filter
//! can be changed at runtime in both cases.

use std::fmt::Write as _;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use keyfort_common::{Error, Result};

/// Receiver for forwarded log events.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: Level, target: &str, message: &str, file: Option<&str>, line: Option<u32>);
}

static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

struct SinkLayer {
    sink: Arc<dyn LogSink>,
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.sink.log(
            *meta.level(),
            meta.target(),
            &visitor.message,
            meta.file(),
            meta.line(),
        );
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{:?}{}", value, fields);
        } else {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        }
    }
}

fn filter_for(max_level: Option<i32>) -> EnvFilter {
    match max_level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => EnvFilter::try_from_env("KEYFORT_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn level_directive(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// Install the standard formatting logger.
///
/// The filter comes from the `KEYFORT_LOG` environment variable, falling
/// back to `info`.
///
/// # Errors
/// - `Unexpected` if a global logger is already installed
pub fn set_default_logger() -> Result<()> {
    let (filter, handle) = reload::Layer::new(filter_for(None));
    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|_| Error::Unexpected("A logger is already installed".to_string()))?;
    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Install a custom log sink, forwarding every enabled event to it.
///
/// # Errors
/// - `Unexpected` if a global logger is already installed
pub fn set_custom_logger(sink: Arc<dyn LogSink>, max_level: Option<i32>) -> Result<()> {
    let (filter, handle) = reload::Layer::new(filter_for(max_level));
    Registry::default()
        .with(filter)
        .with(SinkLayer { sink })
        .try_init()
        .map_err(|_| Error::Unexpected("A logger is already installed".to_string()))?;
    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Change the maximum level of the installed logger.
///
/// Levels: 0 = off, 1 = error, 2 = warn, 3 = info, 4 = debug, 5+ = trace.
///
/// # Errors
/// - `Unexpected` when no logger was installed through this module
pub fn set_max_log_level(level: i32) -> Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| Error::Unexpected("No logger is installed".to_string()))?;
    handle
        .reload(filter_for(Some(level)))
        .map_err(|_| Error::Unexpected("Failed to update the log level".to_string()))
}
