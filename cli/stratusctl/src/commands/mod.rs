//! CLI commands.

mod apply;
mod config;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use stratus_model::{ConfigSource, ConfigurationError, Loaded, Origin};

use crate::output::OutputFormat;

/// stratus - Reconcile cloud infrastructure against a declared desired state.
#[derive(Debug, Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Also write JSON logs to this file.
    #[arg(long, global = true, env = "STRATUS_LOG_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile the environment with the desired state.
    Apply(apply::ApplyCommand),

    /// Show what `apply` would change, without changing anything.
    Plan(apply::PlanCommand),

    /// Validate and inspect the desired-state document.
    Config(config::ConfigCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<ExitCode> {
        crate::logging::init(self.log_file.as_deref())?;

        let ctx = CommandContext {
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Apply(cmd) => cmd.run(ctx).await,
            Commands::Plan(cmd) => cmd.run(ctx).await,
            Commands::Config(cmd) => cmd.run(ctx),
            Commands::Version => {
                println!("stratus {}", env!("CARGO_PKG_VERSION"));
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
}

/// Where to read the desired-state document from.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Desired-state document (YAML or JSON). `-` reads stdin.
    #[arg(
        long,
        short,
        env = "STRATUS_CONFIG",
        value_name = "PATH",
        default_value = ConfigSource::DEFAULT_PATH
    )]
    pub config: PathBuf,
}

impl ConfigArgs {
    fn is_stdin(&self) -> bool {
        self.config == Path::new("-")
    }

    /// Load the document, falling back to the built-in default if absent.
    pub fn load(&self) -> Result<Loaded, ConfigurationError> {
        if !self.is_stdin() {
            return ConfigSource::new(&self.config).load();
        }

        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|source| ConfigurationError::Unreadable {
                path: self.config.clone(),
                source,
            })?;
        Ok(Loaded {
            desired: ConfigSource::parse_str(&text)?,
            origin: Origin::File(self.config.clone()),
        })
    }
}
