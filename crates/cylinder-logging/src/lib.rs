//! # cylinder-logging
//!
//! Logging for the cylinder session tracker.
//!
//! ## Key Types
//!
//! - [`Logger`] - Structured lifecycle event logging
//! - [`LogEvent`] - Log event types
//! - [`LogFormat`] - Output formats (Pretty, JSON, Compact)

mod events;

use std::path::Path;

pub use events::{LogEvent, LogFormat, Logger};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Pretty | LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .init();
        }
    }
}

/// Initialize tracing with an extra daily-rolling JSON file in `dir`.
///
/// Keep the returned guard alive; dropping it flushes and stops the writer.
pub fn init_tracing_with_file(level: &str, format: LogFormat, dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let appender = tracing_appender::rolling::daily(dir, "cylinder.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    subscriber_with_file(filter, format, writer).init();
    guard
}

/// Console layer in `format` plus a JSON layer writing to `writer`.
fn subscriber_with_file(
    filter: EnvFilter,
    format: LogFormat,
    writer: NonBlocking,
) -> Box<dyn Subscriber + Send + Sync> {
    match format {
        LogFormat::Json => Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false))
                .with(fmt::layer().json().with_writer(writer).with_ansi(false)),
        ),
        LogFormat::Pretty | LogFormat::Compact => Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .with(fmt::layer().json().with_writer(writer).with_ansi(false)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn traced_lines(format: LogFormat) -> Vec<serde_json::Value> {
        let dir = TempDir::new().unwrap();
        let appender = tracing_appender::rolling::never(dir.path(), "trace.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let subscriber = subscriber_with_file(EnvFilter::new("info"), format, writer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(session_id = "s1", "level changed");
            tracing::debug!("filtered out");
        });
        drop(guard);

        std::fs::read_to_string(dir.path().join("trace.log"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_file_layer_writes_json_for_every_console_format() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let lines = traced_lines(format);
            assert_eq!(lines.len(), 1, "{:?}", format);
            assert_eq!(lines[0]["fields"]["message"], "level changed");
            assert_eq!(lines[0]["fields"]["session_id"], "s1");
            assert_eq!(lines[0]["level"], "INFO");
        }
    }
}
