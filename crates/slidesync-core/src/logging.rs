//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/slidesync/logs/`
/// Log level is controlled by `SLIDESYNC_LOG` environment variable.
///
/// # Examples
/// ```bash
/// SLIDESYNC_LOG=debug slidesync display --session abc
/// SLIDESYNC_LOG=slidesync_relay=trace slidesync control --session abc
/// ```
pub fn init(role: &str) -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &log_dir, format!("slidesync-{role}.log"));

    // Default to info, allow override via SLIDESYNC_LOG
    let env_filter = EnvFilter::try_from_env("SLIDESYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new("slidesync=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Slidesync {} starting", role);
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("slidesync").join("logs"))
}

