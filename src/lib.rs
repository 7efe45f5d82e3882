//! ClassLive session hub library
//!
//! Real-time channel for live classroom sessions: tracks which connections are attached to
//! each session, serializes start/pause/stop transitions into broadcasts, and relays WebRTC
//! negotiation messages between participants.

pub mod cli;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogConfig;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing with console output and a daily rolling log file
///
/// The returned guard flushes the file writer and must be held until shutdown.
pub fn init_logging(level: &str, log: &LogConfig) -> Result<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let path = Path::new(&log.file_path);
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .context("Log file path has no file name")?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("classlive={}", level).into()),
        )
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
