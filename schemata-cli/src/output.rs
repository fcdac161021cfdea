//! Styled terminal output utilities.

use std::time::Duration;

use owo_colors::OwoColorize;
use schemata_core::{ExecutionReport, ProgressObserver, Schema, SchemaOutcome};

/// Print a header/title
pub fn header(text: &str) {
    println!();
    println!("{}", text.bold().cyan());
    println!("{}", "─".repeat(text.chars().count()).dimmed());
    println!();
}

/// Print a section header
pub fn section(text: &str) {
    println!("{}", text.bold().white());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a success message
pub fn success(text: &str) {
    println!("{} {}", "✔".green().bold(), text.green());
}

/// Print an info message
pub fn info(text: &str) {
    println!("{} {}", "ℹ".blue().bold(), text);
}

/// Print a warning message
pub fn warn(text: &str) {
    println!("{} {}", "⚠".yellow().bold(), text.yellow());
}

/// Print an error message
pub fn error(text: &str) {
    eprintln!("{} {}", "✖".red().bold(), text.red());
}

/// Print a step indicator
pub fn step(current: usize, total: usize, text: &str) {
    println!("{} {}", format!("[{}/{}]", current, total).dimmed(), text);
}

/// Print a list item
pub fn list_item(text: &str) {
    println!("  {} {}", "•".dimmed(), text);
}

/// Print a newline
pub fn newline() {
    println!();
}

/// Print dimmed text
pub fn dim(text: &str) {
    println!("{}", text.dimmed());
}

/// Ask for confirmation
pub fn confirm(prompt: &str) -> bool {
    use std::io::{self, Write};

    print!("{} {} ", prompt, "[y/N]".dimmed());
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Format a duration as `1.23s` or `45ms`.
pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Prints one line per schema as the executor works through them.
#[derive(Debug, Default)]
pub struct ProgressPrinter;

impl ProgressObserver for ProgressPrinter {
    fn on_start(&self, index: usize, total: usize, schema: &Schema) {
        step(index + 1, total, &schema.display_identifier());
    }

    fn on_finish(&self, outcome: &SchemaOutcome) {
        let label = outcome.schema.display_identifier();
        let took = format_duration(outcome.duration);
        match &outcome.result {
            Ok(()) => println!("  {} {} {}", "✔".green(), label, took.dimmed()),
            Err(e) => eprintln!("  {} {} {}", "✖".red(), label, e.to_string().red()),
        }
    }
}

/// Print the totals of a run.
pub fn report(report: &ExecutionReport) {
    newline();
    section("Summary");
    kv("Succeeded", &report.succeeded().count().to_string());
    kv("Failed", &report.failed().count().to_string());
    if !report.skipped.is_empty() {
        kv("Skipped", &report.skipped.len().to_string());
    }
    kv("Duration", &format_duration(report.duration));

    let failed: Vec<&SchemaOutcome> = report.failed().collect();
    if !failed.is_empty() {
        newline();
        section("Failures");
        for outcome in failed {
            if let Err(e) = &outcome.result {
                list_item(&format!("{}: {}", outcome.schema.display_identifier(), e));
            }
        }
    }
    if !report.worker_errors.is_empty() {
        newline();
        section("Worker errors");
        for err in &report.worker_errors {
            list_item(&err.to_string());
        }
    }
    if report.aborted {
        newline();
        warn("Stopped at the first failure; remaining schemas were not processed.");
    }
}
