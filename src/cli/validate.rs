// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::executors::StageExecutor;
use crate::pipeline::{Pipeline, PipelineValidator};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    if !pipeline_path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Run 'stagegate init' to create one.",
            pipeline_path.display()
        ));
    }

    let pipeline = match Pipeline::from_file(&pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  {} Failed to parse pipeline", "✗".red());
            eprintln!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    println!("  {} Pipeline file parsed", "✓".green());

    let validation = PipelineValidator::validate(&pipeline);

    // Runner-level checks (shell on PATH); task stages are registered by library users
    let runner_issues: Vec<String> = StageExecutor::with_default_runners()
        .validate_stages(&pipeline.stages)
        .into_iter()
        .map(|e| e.to_string())
        .collect();

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    let warnings: Vec<&String> = validation.warnings.iter().chain(&runner_issues).collect();
    if !warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        println!("  Default branch: {}", pipeline.default_branch);
        println!("  Stages: {}", pipeline.stages.len());
        for stage in &pipeline.stages {
            let deps = if stage.depends_on.is_empty() {
                String::new()
            } else {
                format!(" [depends: {}]", stage.depends_on.join(", "))
            };
            println!(
                "    - {} ({}, {}){}",
                stage.name,
                stage.runner_name(),
                stage.gate,
                deps.dimmed()
            );
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if warnings.is_empty() {
        println!("{}", "Pipeline is valid!".green().bold());
    } else {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    }
    Ok(())
}
