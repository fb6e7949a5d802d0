//! Apply and plan commands.
//!
//! Both run the orchestrator against the file-backed local provider; `plan`
//! stops after planning.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use stratus_model::Origin;
use stratus_orchestrator::{Orchestrator, OrchestratorConfig, RunMode};
use stratus_reconcile::LocalStateCloud;

use crate::error::EXIT_FAILURE;
use crate::output::{print_info, print_report, OutputFormat};

use super::{CommandContext, ConfigArgs};

/// Reconcile the environment with the desired state.
#[derive(Debug, Args)]
pub struct ApplyCommand {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// Plan only; make no changes.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Show what `apply` would change.
#[derive(Debug, Args)]
pub struct PlanCommand {
    #[command(flatten)]
    pub source: ConfigArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Options shared by `apply` and `plan`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// State file of the local provider.
    #[arg(
        long,
        env = "STRATUS_STATE_FILE",
        value_name = "PATH",
        default_value = ".stratus/state.json"
    )]
    pub state_file: PathBuf,

    /// Directory run reports are written to. Overrides STRATUS_REPORT_DIR.
    #[arg(long, value_name = "PATH")]
    pub report_dir: Option<PathBuf>,

    /// Run deadline in seconds. Overrides STRATUS_RUN_TIMEOUT_SECS.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl RunArgs {
    /// Environment configuration with flag overrides applied.
    fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let mut config =
            OrchestratorConfig::from_env().context("invalid orchestrator environment")?;
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(secs) = self.timeout {
            config.run_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

impl ApplyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        let mode = if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        };
        execute(ctx, &self.source, &self.run, mode).await
    }
}

impl PlanCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        execute(ctx, &self.source, &self.run, RunMode::DryRun).await
    }
}

async fn execute(
    ctx: CommandContext,
    source: &ConfigArgs,
    args: &RunArgs,
    mode: RunMode,
) -> Result<ExitCode> {
    let loaded = source.load()?;
    if loaded.origin == Origin::Default && ctx.format == OutputFormat::Table {
        print_info(&format!(
            "No configuration at {}, using the built-in default.",
            source.config.display()
        ));
    }

    let config = args.orchestrator_config()?;
    let cloud = Arc::new(LocalStateCloud::new(&args.state_file));
    let orchestrator = Orchestrator::new(cloud, config);

    let report = orchestrator
        .run(&loaded.desired, mode)
        .await
        .context("run log rejected an entry")?;

    print_report(&report, ctx.format);

    if report.is_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}
