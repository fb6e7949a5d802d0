//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use stratus_orchestrator::{Outcome, RunMode, RunRecord, RunReport, RunState};
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

/// Print a single item as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(data: &T) {
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    println!("{}", json);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "#")]
    seq: u64,
    #[tabled(rename = "TIME (UTC)")]
    time: String,
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "TRIES")]
    attempts: u32,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

impl From<&RunRecord> for RecordRow {
    fn from(record: &RunRecord) -> Self {
        Self {
            seq: record.seq,
            time: record.timestamp.format("%H:%M:%S%.3f").to_string(),
            service: record.service_kind.to_string(),
            step: record.action.to_string(),
            outcome: record.outcome.to_string(),
            attempts: record.attempts,
            detail: record.detail.clone(),
        }
    }
}

/// One-line summary of a run.
pub fn summary_line(report: &RunReport) -> String {
    let skipped =
        report.count(Outcome::SkippedDependency) + report.count(Outcome::SkippedTimeout);
    format!(
        "run {} {}: {} succeeded, {} failed, {} skipped",
        report.run_id,
        report.state,
        report.count(Outcome::Success),
        report.count(Outcome::Failure),
        skipped
    )
}

/// Print a run report in the specified format.
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let rows: Vec<RecordRow> = report.entries.iter().map(RecordRow::from).collect();
            if rows.is_empty() {
                println!("{}", "No services declared.".dimmed());
            } else {
                println!("{}", Table::new(rows));
            }

            if report.mode == RunMode::DryRun {
                print_info("Dry run: no changes were made.");
            }
            match report.state {
                RunState::Completed => print_success(&summary_line(report)),
                _ => print_warning(&summary_line(report)),
            }
            match (&report.report_path, &report.report_error) {
                (Some(path), _) => print_info(&format!("Report: {}", path.display())),
                (None, Some(error)) => print_warning(&format!("Report not written: {error}")),
                (None, None) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_model::ServiceKind;
    use stratus_orchestrator::RecordAction;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Table);
    }

    #[test]
    fn test_record_row_from_record() {
        let record = RunRecord::new(
            ServiceKind::LoadBalancer,
            RecordAction::Apply,
            Outcome::SkippedDependency,
            "create load_balancer not dispatched: dependency compute_fleet did not converge",
        );
        let row = RecordRow::from(&record);
        assert_eq!(row.service, "load_balancer");
        assert_eq!(row.step, "apply");
        assert_eq!(row.outcome, "skipped-dependency");
        assert_eq!(row.attempts, 0);
    }
}
