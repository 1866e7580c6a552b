//! Logging setup for Blady using tracing.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,blady=debug";

/// Initialize logging with a daily file appender and console output.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(quiet_console: bool) -> Result<(WorkerGuard, PathBuf)> {
    let log_dir = get_log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "blady.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // One-shot commands print their own output; only warnings reach the terminal.
    let console_filter = if quiet_console {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!("Blady logging initialized");
    tracing::debug!("Log directory: {}", log_dir.display());

    Ok((guard, log_dir))
}

/// Get the log directory path.
pub fn get_log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "blady", "blady")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

    Ok(dirs.data_dir().join("logs"))
}
