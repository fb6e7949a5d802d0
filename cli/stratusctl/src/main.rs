//! stratusctl (stratus) - CLI for the stratus infrastructure reconciler
//!
//! Loads the desired-state document, reconciles it against the provider and
//! writes a JSONL run report. Exit status: 0 when the run completed, 1 when
//! it partially failed (or on any other error), 2 on configuration errors.

use std::process::ExitCode;

use clap::Parser;

mod commands;
mod error;
mod logging;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            // Print error in a user-friendly way
            error::print_error(&e);
            ExitCode::from(error::exit_status(&e))
        }
    }
}
