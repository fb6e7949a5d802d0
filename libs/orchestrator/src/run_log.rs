//! Durable, timestamped record of every planned and applied action.
//!
//! Entries may be appended concurrently by same-stage reconcilers. The
//! flushed report is always in timestamp order, one JSON object per line.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_model::ServiceKind;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which step of a run produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Plan,
    Apply,
}

impl std::fmt::Display for RecordAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordAction::Plan => f.write_str("plan"),
            RecordAction::Apply => f.write_str("apply"),
        }
    }
}

/// Outcome of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    Failure,
    /// Not dispatched because a dependency failed.
    SkippedDependency,
    /// Not dispatched because the run deadline passed.
    SkippedTimeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::SkippedDependency | Outcome::SkippedTimeout)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::SkippedDependency => "skipped-dependency",
            Outcome::SkippedTimeout => "skipped-timeout",
        };
        f.write_str(s)
    }
}

/// One entry of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Position in the timestamp-ordered report (1-based).
    pub seq: u64,

    pub timestamp: DateTime<Utc>,
    pub service_kind: ServiceKind,
    pub action: RecordAction,
    pub outcome: Outcome,
    pub detail: String,

    /// Cloud API calls made for this entry (0 when skipped).
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

impl RunRecord {
    /// Create a record stamped with the current UTC time.
    pub fn new(
        service_kind: ServiceKind,
        action: RecordAction,
        outcome: Outcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            service_kind,
            action,
            outcome,
            detail: detail.into(),
            attempts: 0,
            spec_hash: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_spec_hash(mut self, spec_hash: impl Into<String>) -> Self {
        self.spec_hash = Some(spec_hash.into());
        self
    }
}

/// Run log errors.
#[derive(Debug, Error)]
pub enum RunLogError {
    /// The run has ended; the log no longer accepts entries.
    #[error("run log {0} is sealed")]
    Sealed(Uuid),

    #[error("failed to write run report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize run record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Default)]
struct LogInner {
    entries: Vec<RunRecord>,
    sealed: bool,
}

/// Append-only run log shared by the orchestrator and its reconciler tasks.
pub struct RunLogger {
    run_id: Uuid,
    inner: Mutex<LogInner>,
}

impl RunLogger {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            inner: Mutex::new(LogInner::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// File name of the persisted report for this run.
    pub fn report_file_name(&self) -> String {
        format!("run-{}.jsonl", self.run_id)
    }

    /// Append an entry.
    pub async fn record(&self, entry: RunRecord) -> Result<(), RunLogError> {
        match entry.outcome {
            Outcome::Success => info!(
                run_id = %self.run_id,
                kind = %entry.service_kind,
                action = %entry.action,
                attempts = entry.attempts,
                detail = %entry.detail,
                "Run record"
            ),
            Outcome::Failure => warn!(
                run_id = %self.run_id,
                kind = %entry.service_kind,
                action = %entry.action,
                attempts = entry.attempts,
                detail = %entry.detail,
                "Run record: failure"
            ),
            Outcome::SkippedDependency | Outcome::SkippedTimeout => warn!(
                run_id = %self.run_id,
                kind = %entry.service_kind,
                action = %entry.action,
                outcome = %entry.outcome,
                detail = %entry.detail,
                "Run record: skipped"
            ),
        }

        let mut inner = self.inner.lock().await;
        if inner.sealed {
            return Err(RunLogError::Sealed(self.run_id));
        }
        inner.entries.push(entry);
        Ok(())
    }

    /// Snapshot of all entries in timestamp order.
    pub async fn entries(&self) -> Vec<RunRecord> {
        let inner = self.inner.lock().await;
        ordered(&inner.entries)
    }

    /// Stop accepting entries and return the final ordered sequence.
    pub async fn seal(&self) -> Vec<RunRecord> {
        let mut inner = self.inner.lock().await;
        inner.sealed = true;
        ordered(&inner.entries)
    }

    /// Persist `entries` as `run-<id>.jsonl` under `dir`.
    ///
    /// Written to a temp file and renamed, so a partially written report is
    /// never observed.
    pub async fn persist(
        &self,
        entries: &[RunRecord],
        dir: &Path,
    ) -> Result<PathBuf, RunLogError> {
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }

        let path = dir.join(self.report_file_name());
        let tmp_path = path.with_extension("jsonl.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RunLogError::Io { path, source }
        };

        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        tokio::fs::write(&tmp_path, body).await.map_err(io_err(&tmp_path))?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err(&path))?;

        debug!(path = %path.display(), entry_count = entries.len(), "Run report flushed");
        Ok(path)
    }
}

/// Stable sort by timestamp, then number the result.
fn ordered(entries: &[RunRecord]) -> Vec<RunRecord> {
    let mut out = entries.to_vec();
    out.sort_by_key(|e| e.timestamp);
    for (i, entry) in out.iter_mut().enumerate() {
        entry.seq = i as u64 + 1;
    }
    out
}
