//! Logging Infrastructure
//!
//! Structured logging for development and production. `RUST_LOG` wins over
//! the configured level when set.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// File name prefix of the daily rolling log
const LOG_FILE_PREFIX: &str = "procurement-server";

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logger on stdout
pub fn init_logger() {
    init_logger_with_file(None, None);
}

/// Initialize the logger, writing to a daily rolling file when `log_dir`
/// exists
pub fn init_logger_with_file(log_level: Option<&str>, log_dir: Option<&str>) {
    let level = log_level.unwrap_or("info");

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        let log_path = Path::new(dir);
        if log_path.is_dir() {
            let file_appender = tracing_appender::rolling::daily(log_path, LOG_FILE_PREFIX);
            // try_init: tests may install a subscriber first
            let _ = subscriber.with_ansi(false).with_writer(file_appender).try_init();
            return;
        }
    }

    let _ = subscriber.try_init();
}
