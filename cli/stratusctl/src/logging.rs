//! Logging initialization for the CLI.
//!
//! Human-readable events go to stderr. With `--log-file`, the same events are
//! also appended to that file as JSON lines.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used when neither `RUST_LOG` nor `STRATUS_LOG_LEVEL` is set.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global subscriber.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let filter = env_filter()?;

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(())
}

/// `RUST_LOG` wins; otherwise `STRATUS_LOG_LEVEL`, otherwise info.
fn env_filter() -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level =
        std::env::var("STRATUS_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    EnvFilter::try_new(&level).with_context(|| format!("invalid STRATUS_LOG_LEVEL '{level}'"))
}

/// Open `path` for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
