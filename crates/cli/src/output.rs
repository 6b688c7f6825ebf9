//! Output formatting for the run summary

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use pagerun_common::{AggregateResult, RunPhase, SuiteOutcome};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for SuiteOutcome {
    fn headers() -> Vec<&'static str> {
        vec!["Mode", "Status", "Passed", "Failed", "Duration", "Reason"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.mode.to_string(),
            status_word(self.status),
            self.passed_count.to_string(),
            self.failure_count.to_string(),
            format!("{} ms", self.duration_ms),
            self.failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default(),
        ]
    }
}

fn status_word(status: RunPhase) -> String {
    match status {
        RunPhase::Completed => "passed".green().to_string(),
        RunPhase::Failed => "failed".red().to_string(),
        RunPhase::TimedOut => "timed out".yellow().to_string(),
        other => other.to_string(),
    }
}

/// Render the aggregate result
pub fn render_summary(result: &AggregateResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
        OutputFormat::Table => {
            let mut out = String::new();
            if !result.outcomes.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(SuiteOutcome::headers());
                for outcome in &result.outcomes {
                    table.add_row(outcome.row());
                }
                out.push_str(&format!("{table}\n"));
            }
            out.push_str(&footer(result));
            out
        }
        OutputFormat::Plain => {
            let mut out = String::new();
            for outcome in &result.outcomes {
                for (header, value) in SuiteOutcome::headers().iter().zip(outcome.row()) {
                    if !value.is_empty() {
                        out.push_str(&format!("{}: {}\n", header, value));
                    }
                }
                out.push_str("---\n");
            }
            out.push_str(&footer(result));
            out
        }
    }
}

fn footer(result: &AggregateResult) -> String {
    let mut out = String::new();
    let failed: Vec<&str> = result.failed_modes().map(|o| o.mode.as_str()).collect();
    if !failed.is_empty() {
        out.push_str(&format!("Failed: {}\n", failed.join(", ")));
    }
    if !result.skipped.is_empty() {
        let skipped: Vec<&str> = result.skipped.iter().map(|m| m.as_str()).collect();
        out.push_str(&format!("Skipped: {}\n", skipped.join(", ")));
    }
    if let Some(error) = &result.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    let status = if result.success() {
        "✅ all modes passed".green().to_string()
    } else {
        format!("❌ failed (exit {})", result.exit_code).red().to_string()
    };
    out.push_str(&format!("{} in {} ms\n", status, result.duration_ms));
    out
}

/// Print the aggregate result to stdout
pub fn print_summary(result: &AggregateResult, format: OutputFormat) {
    print!("{}", render_summary(result, format));
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}
