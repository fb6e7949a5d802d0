//! Integration tests for full orchestration runs.
//!
//! Every test drives the orchestrator against `FakeCloud` with the tokio
//! clock paused, so retry delays, provider latency and the run deadline are
//! deterministic.

use std::sync::Arc;
use std::time::Duration;

use stratus_model::{DesiredState, ServiceKind};
use stratus_orchestrator::{
    Orchestrator, OrchestratorConfig, Outcome, RecordAction, RunMode, RunReport, RunRecord,
    RunState,
};
use stratus_reconcile::ProviderError;
use stratus_testing::{CallOp, FakeCloud};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        report_dir: dir.path().join("runs"),
        ..OrchestratorConfig::default()
    }
}

fn apply_entry(report: &RunReport, kind: ServiceKind) -> &RunRecord {
    report
        .entries_for(kind)
        .find(|e| e.action == RecordAction::Apply)
        .unwrap_or_else(|| panic!("no apply entry for {kind}"))
}

#[tokio::test(start_paused = true)]
async fn test_fresh_environment_created_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new());
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));
    let state = orchestrator.subscribe();

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(*state.borrow(), RunState::Completed);
    assert_eq!(report.provider, "fake");
    assert_eq!(report.apply_entries().count(), 4);
    assert_eq!(report.count(Outcome::Success), 8);

    let mutations = cloud.mutations().await;
    assert_eq!(mutations.len(), 4);
    assert!(mutations.iter().all(|(_, op)| *op == CallOp::Create));
    assert_eq!(mutations.first().unwrap().0, ServiceKind::Database);
    assert_eq!(mutations.last().unwrap().0, ServiceKind::LoadBalancer);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new());
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));
    let desired = DesiredState::baseline();

    orchestrator.run(&desired, RunMode::Apply).await.unwrap();
    let second = orchestrator.run(&desired, RunMode::Apply).await.unwrap();

    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.apply_entries().count(), 0);
    assert_eq!(cloud.mutations().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_converged_environment_issues_no_mutations() {
    let dir = TempDir::new().unwrap();
    let desired = DesiredState::baseline();
    let cloud = Arc::new(FakeCloud::converged_with(&desired));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator.run(&desired, RunMode::Apply).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.apply_entries().count(), 0);
    assert_eq!(report.entries.len(), 4);
    assert!(report.entries.iter().all(|e| e.detail == "in sync"));
    assert!(cloud.mutations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drifted_fleet_is_updated() {
    let dir = TempDir::new().unwrap();
    let desired = DesiredState::baseline();
    let mut stale = desired.clone();
    if let Some(stratus_model::ServiceSpec::RelayFleet(relay)) =
        stale.services.get_mut(&ServiceKind::RelayFleet)
    {
        relay.instances = 2;
    }
    let cloud = Arc::new(FakeCloud::converged_with(&stale));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator.run(&desired, RunMode::Apply).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        cloud.mutations().await,
        vec![(ServiceKind::RelayFleet, CallOp::Update)]
    );
    let entry = apply_entry(&report, ServiceKind::RelayFleet);
    assert!(entry.detail.contains("instances 2 -> 5"), "{}", entry.detail);
    assert_eq!(
        cloud.observed(ServiceKind::RelayFleet).await.as_ref(),
        desired.get(ServiceKind::RelayFleet)
    );
}

#[tokio::test(start_paused = true)]
async fn test_fleet_failure_skips_load_balancer_only() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(
        FakeCloud::new().fail_apply(
            ServiceKind::ComputeFleet,
            ProviderError::rejected("machine type not available"),
        ),
    );
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(apply_entry(&report, ServiceKind::Database).outcome, Outcome::Success);
    assert_eq!(apply_entry(&report, ServiceKind::RelayFleet).outcome, Outcome::Success);

    let compute = apply_entry(&report, ServiceKind::ComputeFleet);
    assert_eq!(compute.outcome, Outcome::Failure);
    assert!(compute.detail.contains("machine type not available"));

    let lb = apply_entry(&report, ServiceKind::LoadBalancer);
    assert_eq!(lb.outcome, Outcome::SkippedDependency);
    assert_eq!(lb.attempts, 0);
    assert!(lb.detail.contains("compute_fleet"), "{}", lb.detail);

    let mutated: Vec<_> = cloud.mutations().await.into_iter().map(|(k, _)| k).collect();
    assert!(!mutated.contains(&ServiceKind::LoadBalancer));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_once() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new().fail_apply(
        ServiceKind::Database,
        ProviderError::timeout("deadline exceeded"),
    ));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    let db = apply_entry(&report, ServiceKind::Database);
    assert_eq!(db.outcome, Outcome::Success);
    assert_eq!(db.attempts, 2);

    let db_calls = cloud
        .mutations()
        .await
        .into_iter()
        .filter(|(k, _)| *k == ServiceKind::Database)
        .count();
    assert_eq!(db_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_transient_failure_gives_up_after_one_retry() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(
        FakeCloud::new()
            .fail_apply(ServiceKind::Database, ProviderError::rate_limited("429"))
            .fail_apply(ServiceKind::Database, ProviderError::rate_limited("429"))
            .fail_apply(ServiceKind::Database, ProviderError::rate_limited("429")),
    );
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    let db = apply_entry(&report, ServiceKind::Database);
    assert_eq!(db.outcome, Outcome::Failure);
    assert_eq!(db.attempts, 2);

    // Nothing depends on the database.
    for kind in [
        ServiceKind::ComputeFleet,
        ServiceKind::RelayFleet,
        ServiceKind::LoadBalancer,
    ] {
        assert_eq!(apply_entry(&report, kind).outcome, Outcome::Success);
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_not_retried() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new().fail_apply(
        ServiceKind::RelayFleet,
        ProviderError::quota_exceeded("CPUS quota exceeded in us-central1"),
    ));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    let relay = apply_entry(&report, ServiceKind::RelayFleet);
    assert_eq!(relay.outcome, Outcome::Failure);
    assert_eq!(relay.attempts, 1);
    assert_eq!(
        apply_entry(&report, ServiceKind::LoadBalancer).outcome,
        Outcome::SkippedDependency
    );
}

#[tokio::test(start_paused = true)]
async fn test_observe_failure_fails_kind_and_dependants() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new().fail_observe(
        ServiceKind::ComputeFleet,
        ProviderError::permission_denied("compute.instances.list denied"),
    ));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    let plan = report
        .entries_for(ServiceKind::ComputeFleet)
        .find(|e| e.action == RecordAction::Plan)
        .unwrap();
    assert_eq!(plan.outcome, Outcome::Failure);
    assert!(plan.detail.contains("observe failed"));
    assert!(report
        .entries_for(ServiceKind::ComputeFleet)
        .all(|e| e.action == RecordAction::Plan));

    assert_eq!(
        apply_entry(&report, ServiceKind::LoadBalancer).outcome,
        Outcome::SkippedDependency
    );
    assert_eq!(apply_entry(&report, ServiceKind::RelayFleet).outcome, Outcome::Success);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_never_mutates() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new());
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::DryRun)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.mode, RunMode::DryRun);
    assert!(cloud.mutations().await.is_empty());
    assert!(report.entries.iter().all(|e| e.action == RecordAction::Plan));
    assert!(report.entries.iter().all(|e| e.detail.starts_with("create: ")));
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_skips_undispatched_actions() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(
        FakeCloud::new().with_latency(ServiceKind::Database, Duration::from_secs(5)),
    );
    let config = OrchestratorConfig {
        run_timeout: Some(Duration::from_secs(2)),
        ..test_config(&dir)
    };
    let orchestrator = Orchestrator::new(cloud.clone(), config);

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    // In-flight work is allowed to finish.
    assert_eq!(apply_entry(&report, ServiceKind::Database).outcome, Outcome::Success);
    for kind in [
        ServiceKind::ComputeFleet,
        ServiceKind::RelayFleet,
        ServiceKind::LoadBalancer,
    ] {
        let entry = apply_entry(&report, kind);
        assert_eq!(entry.outcome, Outcome::SkippedTimeout, "{kind}");
        assert_eq!(entry.attempts, 0);
    }
    assert_eq!(cloud.mutations().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fleets_dispatched_concurrently() {
    let dir = TempDir::new().unwrap();
    let latency = Duration::from_secs(3);
    let cloud = Arc::new(
        FakeCloud::new()
            .with_latency(ServiceKind::ComputeFleet, latency)
            .with_latency(ServiceKind::RelayFleet, latency),
    );
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    let calls = cloud.calls().await;
    let started = |kind: ServiceKind| {
        calls
            .iter()
            .find(|c| c.kind == kind && c.op.is_mutation())
            .map(|c| c.started_at)
            .unwrap()
    };

    let compute = started(ServiceKind::ComputeFleet);
    let relay = started(ServiceKind::RelayFleet);
    assert_eq!(compute, relay);
    assert!(started(ServiceKind::Database) <= compute);
    assert!(started(ServiceKind::LoadBalancer) >= compute + latency);
}

#[tokio::test(start_paused = true)]
async fn test_load_balancer_without_declared_fleets_is_applied() {
    let dir = TempDir::new().unwrap();
    let baseline = DesiredState::baseline();
    let desired = DesiredState::new(baseline.project.clone())
        .with_service(baseline.get(ServiceKind::LoadBalancer).unwrap().clone());
    let cloud = Arc::new(FakeCloud::new());
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator.run(&desired, RunMode::Apply).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        cloud.mutations().await,
        vec![(ServiceKind::LoadBalancer, CallOp::Create)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_report_written_in_timestamp_order() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(FakeCloud::new().fail_apply(
        ServiceKind::RelayFleet,
        ProviderError::internal("backend error"),
    ));
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    let path = report.report_path.as_ref().expect("report written");
    assert!(path.starts_with(dir.path().join("runs")));
    assert!(report.report_error.is_none());
    let content = std::fs::read_to_string(path).unwrap();
    let written: Vec<RunRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(written, report.entries);
    assert!(written.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(written.iter().enumerate().all(|(i, e)| e.seq == i as u64 + 1));
    assert!(written.iter().all(|e| e.spec_hash.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_report_dir_still_ends_terminal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("runs");
    std::fs::write(&blocker, "a file, not a directory").unwrap();
    let cloud = Arc::new(FakeCloud::new());
    let orchestrator = Orchestrator::new(cloud.clone(), test_config(&dir));
    let state = orchestrator.subscribe();

    let report = orchestrator
        .run(&DesiredState::baseline(), RunMode::Apply)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    assert!(state.borrow().is_terminal());
    assert_eq!(orchestrator.state(), RunState::PartiallyFailed);
    assert!(report.report_path.is_none());
    assert!(report.report_error.is_some());

    assert_eq!(cloud.mutations().await.len(), 4);
    assert_eq!(report.apply_entries().count(), 4);
    assert!(report.apply_entries().all(|e| e.outcome == Outcome::Success));
    assert!(blocker.is_file());
}
