//! Run orchestration for stratus.
//!
//! The [`Orchestrator`] drives the per-kind reconcilers through a run in
//! dependency order, retries transient provider failures once, enforces the
//! run deadline, and records every step in a [`RunLogger`] that is persisted
//! to a JSONL report when the run ends.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use stratus_reconcile::CloudApi;
//! # async fn example(cloud: Arc<dyn CloudApi>) -> anyhow::Result<()> {
//! use stratus_model::DesiredState;
//! use stratus_orchestrator::{Orchestrator, OrchestratorConfig, RunMode};
//!
//! let orchestrator = Orchestrator::new(cloud, OrchestratorConfig::from_env()?);
//! let report = orchestrator.run(&DesiredState::baseline(), RunMode::Apply).await?;
//! println!("{}: {}", report.run_id, report.state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod orchestrator;
pub mod retry;
pub mod run_log;

pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, RunMode, RunReport, RunState, STAGES};
pub use retry::RetryPolicy;
pub use run_log::{Outcome, RecordAction, RunLogError, RunLogger, RunRecord};
