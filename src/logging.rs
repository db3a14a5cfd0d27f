//! Logging setup for the service and the CLI.
//!
//! Logs go to systemd-journald on Linux when it is reachable. Otherwise they go
//! to a daily rolling file, or to stderr when the caller asks for it (the CLI
//! keeps stdout for JSON output).

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive, e.g. `FACEPASS_LOG=debug`.
pub const LOG_ENV: &str = "FACEPASS_LOG";

/// Where logs go when journald is not available.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Rolling file under the given directory (or the data dir when `None`).
    File(Option<PathBuf>),
    Stderr,
}

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber. Must be called at most once per process.
pub fn init(target: LogTarget) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))?;
        }
        LogTarget::File(log_dir) => {
            let log_dir = log_dir.unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("facepass")
                    .join("logs")
            });

            std::fs::create_dir_all(&log_dir)?;

            let file_appender = tracing_appender::rolling::daily(&log_dir, "facepass.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard would stop the writer thread
            let _ = FILE_GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))?;

            tracing::info!(dir = ?log_dir, "Logging initialized with file backend");
        }
    }

    Ok(())
}
