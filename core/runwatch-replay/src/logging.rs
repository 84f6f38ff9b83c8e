//! Tracing setup for the replay harness.
//!
//! Logs go to stderr so stdout stays clean for the snapshot JSON. With
//! `--log-dir` a daily-rolling file receives the same events.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Forces debug-level logging when set to a truthy value.
pub const DEBUG_LOG_ENV: &str = "RUNWATCH_DEBUG_LOG";

const LOG_FILE_PREFIX: &str = "runwatch-replay.log";

fn debug_enabled() -> bool {
    env::var(DEBUG_LOG_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "YES")
}

fn build_filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Keep the guard alive until exit so the
/// file writer flushes.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            let installed = tracing_subscriber::registry()
                .with(build_filter())
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            installed.ok().map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(build_filter())
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }
}
