//! Run orchestration.
//!
//! A run moves through `Idle → Planning → Applying → Completed |
//! PartiallyFailed`:
//!
//! - **Planning** observes every declared kind and computes its actions.
//!   Nothing is mutated.
//! - **Applying** dispatches actions stage by stage (database, then both
//!   fleets concurrently, then the load balancer). A kind whose dependency
//!   failed is skipped; independent kinds still proceed.
//!
//! Nothing is rolled back. A later run converges again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stratus_model::{DesiredState, ProjectIdentity, ServiceKind};
use stratus_reconcile::{CloudApi, Plan, ServiceReconciler};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::retry::RetryPolicy;
use crate::run_log::{Outcome, RecordAction, RunLogError, RunLogger, RunRecord};

/// Apply order. Kinds within a stage have no mutual dependency.
pub const STAGES: [&[ServiceKind]; 3] = [
    &[ServiceKind::Database],
    &[ServiceKind::ComputeFleet, ServiceKind::RelayFleet],
    &[ServiceKind::LoadBalancer],
];

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Applying,
    Completed,
    PartiallyFailed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::PartiallyFailed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Planning => "planning",
            RunState::Applying => "applying",
            RunState::Completed => "completed",
            RunState::PartiallyFailed => "partially_failed",
        };
        f.write_str(s)
    }
}

/// Whether a run may mutate the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    /// Planning only.
    DryRun,
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub provider: String,
    pub project: ProjectIdentity,
    pub mode: RunMode,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<RunRecord>,

    /// Where the report was persisted; `None` if writing it failed.
    pub report_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_error: Option<String>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Entries produced while applying.
    pub fn apply_entries(&self) -> impl Iterator<Item = &RunRecord> {
        self.entries
            .iter()
            .filter(|e| e.action == RecordAction::Apply)
    }

    /// Entries for `kind`, in report order.
    pub fn entries_for(&self, kind: ServiceKind) -> impl Iterator<Item = &RunRecord> {
        self.entries.iter().filter(move |e| e.service_kind == kind)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// What happened to a kind while applying, for dependency decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindResult {
    /// Nothing to do.
    Converged,
    Applied,
    Failed,
    Skipped,
}

impl KindResult {
    fn blocks_dependants(&self) -> bool {
        matches!(self, KindResult::Failed | KindResult::Skipped)
    }
}

/// Sequences the per-kind reconcilers for one run at a time.
pub struct Orchestrator {
    cloud: Arc<dyn CloudApi>,
    config: OrchestratorConfig,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    pub fn new(cloud: Arc<dyn CloudApi>, config: OrchestratorConfig) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            cloud,
            config,
            state,
        }
    }

    /// Watch run state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn transition(&self, run_id: Uuid, next: RunState) {
        let previous = self.state.send_replace(next);
        info!(%run_id, from = %previous, to = %next, "Run state changed");
    }

    /// Run reconciliation once.
    ///
    /// Always ends in a terminal state. Provider failures are reported in the
    /// returned [`RunReport`]; so is a report that could not be written, which
    /// makes the run partially failed. Errors only if the log rejects an
    /// entry before the run ends.
    #[instrument(
        skip(self, desired),
        fields(project = %desired.project, provider = self.cloud.provider())
    )]
    pub async fn run(
        &self,
        desired: &DesiredState,
        mode: RunMode,
    ) -> Result<RunReport, RunLogError> {
        let run_id = Uuid::now_v7();
        let logger = Arc::new(RunLogger::new(run_id));
        let started_at = Utc::now();
        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);

        self.state.send_replace(RunState::Idle);
        info!(
            %run_id,
            ?mode,
            service_count = desired.services.len(),
            "Starting run"
        );

        if let Err(e) = self.execute(run_id, desired, mode, &logger, deadline).await {
            logger.seal().await;
            self.transition(run_id, RunState::PartiallyFailed);
            return Err(e);
        }

        let entries = logger.seal().await;
        let (report_path, report_error) =
            match logger.persist(&entries, &self.config.report_dir).await {
                Ok(path) => (Some(path), None),
                Err(e) => {
                    error!(%run_id, error = %e, "Failed to write run report");
                    (None, Some(e.to_string()))
                }
            };

        let state = if report_error.is_none() && entries.iter().all(|e| e.outcome.is_success()) {
            RunState::Completed
        } else {
            RunState::PartiallyFailed
        };
        self.transition(run_id, state);

        let report = RunReport {
            run_id,
            provider: self.cloud.provider().to_string(),
            project: desired.project.clone(),
            mode,
            state,
            started_at,
            finished_at: Utc::now(),
            entries,
            report_path,
            report_error,
        };

        info!(
            %run_id,
            state = %report.state,
            succeeded = report.count(Outcome::Success),
            failed = report.count(Outcome::Failure),
            skipped_dependency = report.count(Outcome::SkippedDependency),
            skipped_timeout = report.count(Outcome::SkippedTimeout),
            report = ?report.report_path,
            "Run finished"
        );

        Ok(report)
    }

    async fn execute(
        &self,
        run_id: Uuid,
        desired: &DesiredState,
        mode: RunMode,
        logger: &Arc<RunLogger>,
        deadline: Option<Instant>,
    ) -> Result<(), RunLogError> {
        self.transition(run_id, RunState::Planning);
        let plans = self.plan_all(desired, logger).await?;

        if mode == RunMode::Apply {
            self.transition(run_id, RunState::Applying);
            self.apply_all(&desired.project, &plans, logger, deadline).await?;
        }
        Ok(())
    }

    /// Observe and plan every declared kind, in stage order.
    ///
    /// `None` marks a kind whose observation failed.
    async fn plan_all(
        &self,
        desired: &DesiredState,
        logger: &RunLogger,
    ) -> Result<BTreeMap<ServiceKind, Option<Plan>>, RunLogError> {
        let mut plans = BTreeMap::new();

        for kind in STAGES.iter().flat_map(|stage| stage.iter().copied()) {
            let Some(spec) = desired.get(kind) else {
                continue;
            };

            let reconciler = ServiceReconciler::new(kind, Arc::clone(&self.cloud));
            let (reconciler_ref, project) = (&reconciler, &desired.project);
            let (observed, attempts) = self
                .config
                .retry
                .run(None, move || reconciler_ref.observe(project))
                .await;

            match observed {
                Ok(observed) => {
                    let plan = reconciler.plan(spec, observed.as_ref());
                    logger
                        .record(
                            RunRecord::new(kind, RecordAction::Plan, Outcome::Success, &plan.detail)
                                .with_attempts(attempts)
                                .with_spec_hash(plan.spec_hash.as_str()),
                        )
                        .await?;
                    plans.insert(kind, Some(plan));
                }
                Err(err) => {
                    logger
                        .record(
                            RunRecord::new(
                                kind,
                                RecordAction::Plan,
                                Outcome::Failure,
                                format!("observe failed: {err}"),
                            )
                            .with_attempts(attempts),
                        )
                        .await?;
                    plans.insert(kind, None);
                }
            }
        }

        Ok(plans)
    }

    /// Dispatch planned actions stage by stage.
    async fn apply_all(
        &self,
        project: &ProjectIdentity,
        plans: &BTreeMap<ServiceKind, Option<Plan>>,
        logger: &Arc<RunLogger>,
        deadline: Option<Instant>,
    ) -> Result<(), RunLogError> {
        let mut results: BTreeMap<ServiceKind, KindResult> = BTreeMap::new();

        for stage in STAGES {
            let mut handles = Vec::new();

            for &kind in stage {
                let Some(plan) = plans.get(&kind) else {
                    continue;
                };
                let Some(plan) = plan else {
                    results.insert(kind, KindResult::Failed);
                    continue;
                };
                if plan.actions.is_empty() {
                    results.insert(kind, KindResult::Converged);
                    continue;
                }

                if deadline.is_some_and(|d| Instant::now() >= d) {
                    record_skipped(logger, plan, Outcome::SkippedTimeout, "run deadline passed")
                        .await?;
                    results.insert(kind, KindResult::Skipped);
                    continue;
                }

                let blocker = kind
                    .dependencies()
                    .iter()
                    .find(|dep| results.get(*dep).is_some_and(KindResult::blocks_dependants));
                if let Some(dep) = blocker {
                    let reason = format!("dependency {dep} did not converge");
                    record_skipped(logger, plan, Outcome::SkippedDependency, &reason).await?;
                    results.insert(kind, KindResult::Skipped);
                    continue;
                }

                let reconciler = ServiceReconciler::new(kind, Arc::clone(&self.cloud));
                let handle = tokio::spawn(dispatch(
                    reconciler,
                    project.clone(),
                    plan.clone(),
                    Arc::clone(logger),
                    self.config.retry,
                    deadline,
                ));
                handles.push((kind, handle));
            }

            for (kind, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result?,
                    Err(e) => {
                        error!(%kind, error = %e, "Reconciler task aborted");
                        logger
                            .record(RunRecord::new(
                                kind,
                                RecordAction::Apply,
                                Outcome::Failure,
                                format!("reconciler task aborted: {e}"),
                            ))
                            .await?;
                        KindResult::Failed
                    }
                };
                results.insert(kind, result);
            }
        }

        Ok(())
    }
}

/// Record every action of `plan` as not dispatched.
async fn record_skipped(
    logger: &RunLogger,
    plan: &Plan,
    outcome: Outcome,
    reason: &str,
) -> Result<(), RunLogError> {
    for action in &plan.actions {
        logger
            .record(
                RunRecord::new(
                    plan.kind,
                    RecordAction::Apply,
                    outcome,
                    format!("{action} not dispatched: {reason}"),
                )
                .with_spec_hash(plan.spec_hash.as_str()),
            )
            .await?;
    }
    Ok(())
}

/// Dispatch one kind's actions, recording one entry per action.
async fn dispatch(
    reconciler: ServiceReconciler,
    project: ProjectIdentity,
    plan: Plan,
    logger: Arc<RunLogger>,
    retry: RetryPolicy,
    deadline: Option<Instant>,
) -> Result<KindResult, RunLogError> {
    let kind = reconciler.kind();
    let mut result = KindResult::Applied;

    for action in &plan.actions {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            logger
                .record(
                    RunRecord::new(
                        kind,
                        RecordAction::Apply,
                        Outcome::SkippedTimeout,
                        format!("{action} not dispatched: run deadline passed"),
                    )
                    .with_spec_hash(plan.spec_hash.as_str()),
                )
                .await?;
            result = KindResult::Skipped;
            continue;
        }

        let (reconciler_ref, project_ref) = (&reconciler, &project);
        let (outcome, attempts) = retry
            .run(deadline, move || async move {
                reconciler_ref.apply(project_ref, action).await.outcome
            })
            .await;

        let record = match outcome {
            Ok(receipt) => RunRecord::new(
                kind,
                RecordAction::Apply,
                Outcome::Success,
                format!("{} ({})", plan.detail, receipt.resource_id),
            ),
            Err(err) => {
                result = KindResult::Failed;
                RunRecord::new(
                    kind,
                    RecordAction::Apply,
                    Outcome::Failure,
                    format!("{action} failed: {err}"),
                )
            }
        };
        logger
            .record(
                record
                    .with_attempts(attempts)
                    .with_spec_hash(plan.spec_hash.as_str()),
            )
            .await?;
    }

    Ok(result)
}
