// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Run command - execute the pipeline

use colored::Colorize;
use miette::Result;
use std::path::Path;
use std::time::Duration;

use super::{load_pipeline, report_error, RunArgs};
use crate::executors::StageExecutor;
use crate::pipeline::{
    CancellationToken, ExecutionOptions, Pipeline, PipelineEngine, PipelineValidator, RunReport,
    RunResult, RunState,
};
use crate::utils;
use crate::version::Trigger;

/// Run the pipeline
pub async fn run(args: RunArgs, verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&args.pipeline)?;
    check_pipeline(&pipeline, verbose)?;

    let trigger = args.trigger.to_trigger()?;
    let options = ExecutionOptions {
        max_parallel: args.jobs,
        timeout: args.timeout.map(Duration::from_secs),
        targets: args.stage.clone(),
        keep_scratch: args.keep_scratch,
        ..Default::default()
    };

    if args.dry_run {
        return print_plan(&pipeline, &trigger, &options);
    }

    let engine = PipelineEngine::new(StageExecutor::with_default_runners());

    // Check required runners are available
    let missing = engine.executor().missing_runners(&pipeline.stages).await;
    if !missing.is_empty() {
        eprintln!("{}", "Missing runners:".red().bold());
        for runner in &missing {
            utils::print_error(runner);
        }
        return Err(miette::miette!("Required runners are not available"));
    }

    let result = execute(&engine, &pipeline, &trigger, &options).await?;
    let report = &result.report;

    print_report(report, verbose);

    if let Some(ref path) = args.report {
        write_report(report, path)?;
        utils::print_info(&format!("Report written to {}", path.display()));
    }

    if let Some(ref dir) = args.artifacts_dir {
        let written = result.artifacts.export_to(dir).await?;
        utils::print_info(&format!(
            "{} artifact file(s) exported to {}",
            written.len(),
            dir.display()
        ));
    }

    match report.state {
        RunState::Succeeded => Ok(()),
        RunState::PartiallySucceeded => Err(miette::miette!("Pipeline partially succeeded")),
        _ => Err(miette::miette!("Pipeline execution failed")),
    }
}

/// Validate before running and surface warnings
pub(crate) fn check_pipeline(pipeline: &Pipeline, verbose: bool) -> Result<()> {
    let validation = PipelineValidator::validate(pipeline);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    Ok(())
}

/// Run once, cancelling on Ctrl-C
pub(crate) async fn execute(
    engine: &PipelineEngine,
    pipeline: &Pipeline,
    trigger: &Trigger,
    options: &ExecutionOptions,
) -> Result<RunResult> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel("interrupted");
            }
        })
    };

    let spinner = utils::create_spinner(&format!("Running {}...", pipeline.name));
    let result = engine
        .run_with_cancel(pipeline, trigger, options, cancel)
        .await;
    spinner.finish_and_clear();
    interrupt.abort();

    result.map_err(report_error)
}

fn print_plan(pipeline: &Pipeline, trigger: &Trigger, options: &ExecutionOptions) -> Result<()> {
    let version = crate::pipeline::resolve_version(pipeline, trigger).map_err(report_error)?;
    let (_, levels) = PipelineEngine::plan(pipeline, options).map_err(report_error)?;

    utils::print_header(&format!("Execution plan: {}", pipeline.name));
    println!("  {} {}", "Version:".dimmed(), version);
    for (i, level) in levels.iter().enumerate() {
        utils::print_section(&format!("Level {}", i + 1));
        for name in level {
            utils::print_bullet(name);
        }
    }
    println!();
    println!("{}", "(dry run)".dimmed());

    Ok(())
}

pub(crate) fn print_report(report: &RunReport, verbose: bool) {
    println!();
    println!(
        "{} {} {}",
        report.pipeline.bold(),
        report.version.primary.cyan(),
        format!("({})", report.trigger).dimmed()
    );

    for record in &report.stages {
        utils::print_outcome(record, verbose);
    }

    println!();
    println!(
        "{} {} in {:.2}s",
        "Run".bold(),
        utils::state_label(report.state),
        report.duration_ms as f64 / 1000.0
    );

    if report.cancelled {
        utils::print_warning("run was cancelled");
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| miette::miette!("Failed to create '{}': {}", parent.display(), e))?;
    }
    std::fs::write(path, json)
        .map_err(|e| miette::miette!("Failed to write report '{}': {}", path.display(), e))
}
