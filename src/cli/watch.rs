// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Watch command - re-run pipeline on file changes

use colored::Colorize;
use glob::Pattern;
use miette::Result;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{load_pipeline, TriggerArgs};
use crate::executors::StageExecutor;
use crate::pipeline::{ExecutionOptions, PipelineEngine};

/// Run the watch command
pub async fn run(pipeline_path: PathBuf, debounce_ms: u64, verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;
    let ignore = compile_ignore(&pipeline.watch.ignore)?;

    println!("{}", "Starting watch mode...".bold());
    println!("Watching for changes (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), move |res: DebounceEventResult| {
        // Receiver gone means watch mode is shutting down
        let _ = tx.send(res);
    })
    .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    debouncer
        .watcher()
        .watch(Path::new("."), RecursiveMode::Recursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    let root = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    run_pipeline(&pipeline_path, verbose).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Watch mode stopped.".dimmed());
                break;
            }
            event = rx.recv() => match event {
                Some(Ok(events)) => {
                    let relevant: Vec<PathBuf> = events
                        .into_iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path)
                        .filter(|path| !is_ignored(path, &root, &ignore))
                        .collect();

                    if relevant.is_empty() {
                        continue;
                    }

                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );

                    if verbose {
                        for path in &relevant {
                            println!("  {}", path.display());
                        }
                    }

                    println!();
                    run_pipeline(&pipeline_path, verbose).await;
                }
                Some(Err(e)) => {
                    eprintln!("{}: {:?}", "Watch error".red(), e);
                }
                None => break,
            }
        }
    }

    Ok(())
}

fn compile_ignore(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| miette::miette!("Invalid watch.ignore pattern '{}': {}", p, e))
        })
        .collect()
}

/// Whether a changed path matches one of the ignore globs
fn is_ignored(path: &Path, root: &Path, ignore: &[Pattern]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let candidates = [path.to_string_lossy(), relative.to_string_lossy()];
    ignore
        .iter()
        .any(|pattern| candidates.iter().any(|c| pattern.matches(c)))
}

async fn run_pipeline(pipeline_path: &Path, verbose: bool) {
    // Reload on every run so edits to the pipeline file take effect
    let pipeline = match load_pipeline(pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load pipeline".red(), e);
            return;
        }
    };

    if let Err(e) = super::run::check_pipeline(&pipeline, verbose) {
        eprintln!("{}", e);
        return;
    }

    let trigger = match TriggerArgs::default().to_trigger() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: {}", "Cannot build trigger".red(), e);
            return;
        }
    };

    let engine = PipelineEngine::new(StageExecutor::with_default_runners());
    match super::run::execute(&engine, &pipeline, &trigger, &ExecutionOptions::default()).await {
        Ok(result) => super::run::print_report(&result.report, verbose),
        Err(e) => eprintln!("{}: {}", "Pipeline execution error".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignores() {
        let root = Path::new("/repo");
        let ignore = compile_ignore(&crate::pipeline::WatchConfig::default().ignore).unwrap();

        assert!(is_ignored(Path::new("/repo/.stagegate/work/a/out/x"), root, &ignore));
        assert!(is_ignored(Path::new("/repo/.git/index"), root, &ignore));
        assert!(!is_ignored(Path::new("/repo/src/train.py"), root, &ignore));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(compile_ignore(&["[".to_string()]).is_err());
    }
}
