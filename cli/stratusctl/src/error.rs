//! Error handling and display for the CLI.

use colored::Colorize;
use stratus_model::ConfigurationError;
use stratus_orchestrator::RunLogError;

/// Exit status for a run that ended `PartiallyFailed`, and for other errors.
pub const EXIT_FAILURE: u8 = 1;

/// Exit status for configuration errors (nothing was touched).
pub const EXIT_CONFIGURATION: u8 = 2;

/// Map an error to the process exit status.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigurationError>().is_some() {
        EXIT_CONFIGURATION
    } else {
        EXIT_FAILURE
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    // Check for specific error types and provide hints
    if let Some(config_err) = err.downcast_ref::<ConfigurationError>() {
        match config_err {
            ConfigurationError::Invalid {
                document,
                violations,
            } => {
                eprintln!(
                    "{} invalid configuration {}",
                    "Error:".red().bold(),
                    document
                );
                for violation in violations {
                    eprintln!("  {} {}", violation.path.bold(), violation.message);
                }
                eprintln!(
                    "\n{}",
                    "Hint: Run `stratus config validate` after fixing the document.".yellow()
                );
            }
            ConfigurationError::Unreadable { .. } => {
                eprintln!("{} {}", "Error:".red().bold(), config_err);
                eprintln!(
                    "\n{}",
                    "Hint: Check the path and its permissions, or pass --config.".yellow()
                );
            }
        }
        return;
    }

    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(RunLogError::Io { .. }) = err.downcast_ref::<RunLogError>() {
        eprintln!(
            "\n{}",
            "Hint: The run report directory must be writable. Use --report-dir to change it."
                .yellow()
        );
    }
}
