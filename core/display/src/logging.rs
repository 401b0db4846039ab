//! Logging for the device process: stderr plus a daily-rolling file under
//! `~/.scanpad/logs/`.
//!
//! `SCANPAD_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` applies,
//! defaulting to `info`. If the log directory cannot be created, logging
//! continues on stderr only.

use std::env;
use std::io;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "scanpad-display.log";

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_dir: &Path) -> Option<LoggingGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(LoggingGuard { _file_guard: guard })
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .init();
            tracing::warn!(error = %err, "File logging disabled");
            None
        }
    }
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var("SCANPAD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
