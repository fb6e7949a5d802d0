//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};

/// Orchestrator configuration (env-driven, overridable by the caller).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry policy for transient provider failures.
    pub retry: RetryPolicy,

    /// Run-level deadline for the Applying stage.
    pub run_timeout: Option<Duration>,

    /// Directory run reports are written to.
    pub report_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            run_timeout: None,
            report_dir: PathBuf::from("runs"),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let retry_delay_ms: u64 = std::env::var("STRATUS_RETRY_DELAY_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("STRATUS_RETRY_DELAY_MS must be an integer (milliseconds).")?
            .unwrap_or(DEFAULT_RETRY_DELAY.as_millis() as u64);

        // A single bounded retry is the most the orchestrator will do.
        let max_retries: u32 = std::env::var("STRATUS_MAX_RETRIES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("STRATUS_MAX_RETRIES must be an integer.")?
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .clamp(0, 1);

        let run_timeout = std::env::var("STRATUS_RUN_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("STRATUS_RUN_TIMEOUT_SECS must be an integer (seconds).")?
            .map(Duration::from_secs);

        let report_dir = std::env::var("STRATUS_REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("runs"));

        Ok(Self {
            retry: RetryPolicy {
                max_retries,
                delay: Duration::from_millis(retry_delay_ms),
            },
            run_timeout,
            report_dir,
        })
    }
}
