//! File logging for the CLI.
//!
//! Writes to a daily-rotated file under ~/.smartband/logs so that stdout stays
//! reserved for replies. `SMARTBAND_DEBUG_LOG=1` raises the level to debug;
//! otherwise `RUST_LOG` applies, defaulting to `warn`.

use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "smartband.log";

/// Installs the subscriber. Keep the guard alive for the life of the process.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = smartband_core::config::smartband_dir()?.join("logs");
    if fs_err::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    result.ok().map(|_| guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("SMARTBAND_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}
