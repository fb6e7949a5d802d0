//! Config commands.
//!
//! These commands operate purely on the local document (offline).

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use stratus_model::{DesiredState, Loaded, Origin, ServiceKind};

use crate::output::{print_info, print_json, print_success, OutputFormat};

use super::{CommandContext, ConfigArgs};

/// Config commands.
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    /// Validate the desired-state document without contacting the provider.
    Validate(ConfigArgs),

    /// Print the effective desired state (explicit or built-in default).
    Show(ConfigArgs),
}

#[derive(Debug, Serialize)]
struct ValidationSummary<'a> {
    valid: bool,
    source: String,
    defaulted: bool,
    project: &'a str,
    services: Vec<ServiceKind>,
}

impl ConfigCommand {
    pub fn run(self, ctx: CommandContext) -> Result<ExitCode> {
        match self.command {
            ConfigSubcommand::Validate(args) => validate(ctx, args),
            ConfigSubcommand::Show(args) => show(ctx, args),
        }
    }
}

fn source_label(args: &ConfigArgs, loaded: &Loaded) -> String {
    match &loaded.origin {
        Origin::File(path) => path.display().to_string(),
        Origin::Default => format!("built-in default ({} not found)", args.config.display()),
    }
}

fn validate(ctx: CommandContext, args: ConfigArgs) -> Result<ExitCode> {
    let loaded = args.load()?;
    let desired = &loaded.desired;

    match ctx.format {
        OutputFormat::Json => print_json(&ValidationSummary {
            valid: true,
            source: source_label(&args, &loaded),
            defaulted: loaded.origin == Origin::Default,
            project: &desired.project.id,
            services: desired.services.keys().copied().collect(),
        }),
        OutputFormat::Table => {
            print_success(&format!(
                "Configuration is valid: {}",
                source_label(&args, &loaded)
            ));
            print_info(&format!("project: {}", desired.project));
            for (kind, spec) in &desired.services {
                print_info(&format!("{kind}: {}", spec.summary()));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn show(ctx: CommandContext, args: ConfigArgs) -> Result<ExitCode> {
    let loaded = args.load()?;

    match ctx.format {
        OutputFormat::Json => print_json(&loaded.desired),
        OutputFormat::Table => print!("{}", render_yaml(&loaded.desired)?),
    }

    Ok(ExitCode::SUCCESS)
}

fn render_yaml(desired: &DesiredState) -> Result<String> {
    serde_yaml::to_string(desired).context("failed to render desired state as YAML")
}
