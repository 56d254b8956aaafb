//! Logging Infrastructure
//!
//! Console output (text or JSON) filtered by `RUST_LOG`, falling back to the
//! configured level, plus an optional daily rolling JSON file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the lifetime of the process. Calling this twice is a no-op.
pub fn init_logger(level: &str, json: bool, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_current_span(false).boxed());
    } else {
        layers.push(fmt::layer().with_target(false).boxed());
    }

    let mut guard = None;
    if let Some(dir) = log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "backoffice-server");
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
                guard = Some(file_guard);
            }
            Err(e) => eprintln!("Log directory {dir} unavailable, file logging disabled: {e}"),
        }
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_err()
    {
        return None;
    }
    guard
}
