// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Terminal color utilities
//!
//! Provides consistent color schemes across the CLI.

use colored::{ColoredString, Colorize};

use crate::pipeline::{RunState, StageOutcome, StageRecord};

/// Colored label of a run state
pub fn state_label(state: RunState) -> ColoredString {
    let label = state.to_string();
    match state {
        RunState::Succeeded => label.green().bold(),
        RunState::PartiallySucceeded => label.yellow().bold(),
        RunState::Failed => label.red().bold(),
        RunState::Pending | RunState::Running => label.blue(),
    }
}

/// Print one stage record as a status line
pub fn print_outcome(record: &StageRecord, verbose: bool) {
    let timing = format!("({:.2}s)", record.duration_ms as f64 / 1000.0);

    match &record.outcome {
        StageOutcome::Success { produced_artifacts } => {
            println!("  {} {} {}", "✓".green(), record.name.bold(), timing.dimmed());
            if verbose {
                for artifact in produced_artifacts {
                    println!("      {} {}", "→".blue(), artifact.dimmed());
                }
            }
        }
        StageOutcome::Failure { reason, exit_info } => {
            println!("  {} {} - {}", "✗".red(), record.name.bold(), reason.red());
            if let Some(info) = exit_info {
                let lines: Vec<&str> = info.stderr.lines().collect();
                let shown = if verbose { lines.len() } else { 5 };
                for line in &lines[lines.len().saturating_sub(shown)..] {
                    println!("      {}", line.dimmed());
                }
            }
        }
        StageOutcome::Skipped { cause } => {
            println!(
                "  {} {} {}",
                "○".dimmed(),
                record.name.dimmed(),
                format!("(skipped: {})", cause).dimmed()
            );
        }
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.len().max(40)));
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a bullet point
pub fn print_bullet(content: &str) {
    println!("  • {}", content);
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
