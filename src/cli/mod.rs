// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for stagegate.

pub mod graph;
pub mod init;
pub mod run;
pub mod validate;
pub mod version;
pub mod watch;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::errors::StagegateError;
use crate::pipeline::Pipeline;
use crate::version::{Trigger, TriggerKind};

/// Default pipeline file
pub const DEFAULT_PIPELINE: &str = ".stagegate.yaml";

/// Staged pipeline orchestrator
///
/// Runs dependency-ordered stages that hand artifacts to each other and
/// tags every run with a version derived from its trigger.
#[derive(Parser, Debug)]
#[clap(
    name = "stagegate",
    version,
    about = "Staged pipeline orchestrator with artifact-gated execution",
    long_about = None,
    after_help = "Examples:\n\
        stagegate init --template ml-delivery   Create a starter pipeline\n\
        stagegate run                           Run as a manual trigger\n\
        stagegate run --from-env                Run with the CI trigger\n\
        stagegate version --event tag --ref v1.2.3\n\n\
        See 'stagegate <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter pipeline file
    Init {
        /// Pipeline name (defaults to current directory name)
        name: Option<String>,

        /// Template (minimal, ml-delivery)
        #[clap(short, long, default_value = "minimal")]
        template: String,

        /// Overwrite an existing pipeline file
        #[clap(long)]
        force: bool,
    },

    /// Execute one run of the pipeline
    Run(RunArgs),

    /// Re-run the pipeline on file changes
    Watch {
        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// Print the version tags a trigger resolves to
    Version {
        #[clap(flatten)]
        trigger: TriggerArgs,

        /// Default branch (read from the pipeline file when omitted)
        #[clap(long)]
        default_branch: Option<String>,

        /// Pipeline file providing the default branch
        #[clap(short, long, default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Arguments of `stagegate run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Pipeline file
    #[clap(short, long, default_value = DEFAULT_PIPELINE)]
    pub pipeline: PathBuf,

    /// Run only these stages (and what they depend on)
    #[clap(short, long)]
    pub stage: Vec<String>,

    /// Show the execution plan without running anything
    #[clap(long)]
    pub dry_run: bool,

    #[clap(flatten)]
    pub trigger: TriggerArgs,

    /// Maximum stages running at once (0 = no limit)
    #[clap(short, long, default_value = "0")]
    pub jobs: usize,

    /// Cancel the run after this many seconds
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write the JSON run report here
    #[clap(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Export published artifacts into this directory
    #[clap(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,
    /// Keep per-stage scratch directories after the run
    #[clap(long)]
    pub keep_scratch: bool,
}

/// Trigger description shared by `run` and `version`
#[derive(Args, Debug, Clone, Default)]
pub struct TriggerArgs {
    /// Trigger kind (tag, branch, pr, manual)
    #[clap(long, env = "STAGEGATE_EVENT")]
    pub event: Option<TriggerKind>,

    /// Tag, branch or pull-request ref
    #[clap(long = "ref", env = "STAGEGATE_REF", value_name = "REF")]
    pub ref_name: Option<String>,

    /// Commit identifier
    #[clap(long, env = "STAGEGATE_COMMIT")]
    pub commit: Option<String>,

    /// Read the trigger from CI variables (GITHUB_EVENT_NAME, GITHUB_REF, GITHUB_SHA)
    #[clap(long, conflicts_with_all = ["event", "ref_name", "commit"])]
    pub from_env: bool,
}

impl TriggerArgs {
    /// Build the trigger; without flags this is a manual run of the default branch
    pub fn to_trigger(&self) -> miette::Result<Trigger> {
        if self.from_env {
            return Trigger::from_ci_env().map_err(report_error);
        }

        let kind = self.event.unwrap_or(TriggerKind::Manual);
        let ref_name = self.ref_name.clone().unwrap_or_default();
        let commit = match &self.commit {
            Some(commit) => commit.clone(),
            None if kind == TriggerKind::TagPush => String::new(),
            None => git_head().ok_or_else(|| {
                miette::miette!(
                    "No commit given and `git rev-parse HEAD` failed.\n\n\
                     Pass --commit or set STAGEGATE_COMMIT."
                )
            })?,
        };

        Ok(Trigger::new(kind, ref_name, commit))
    }
}

/// Commit checked out in the current directory
fn git_head() -> Option<String> {
    let git = which::which("git").ok()?;
    let output = std::process::Command::new(git)
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!head.is_empty()).then_some(head)
}

/// Load a pipeline file, mapping errors for display
pub(crate) fn load_pipeline(path: &Path) -> miette::Result<Pipeline> {
    if !path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Run 'stagegate init' to create one.",
            path.display()
        ));
    }

    Pipeline::from_file(path).map_err(|e| miette::miette!("Failed to load pipeline: {}", e))
}

/// Convert a library error for display, printing its recovery steps first
pub(crate) fn report_error(error: StagegateError) -> miette::Report {
    if let Some(suggestion) = error.recovery() {
        eprintln!();
        eprint!("{}", suggestion);
        if error.is_graph_error() {
            eprintln!("  Run 'stagegate validate' for the full list of problems.");
        }
        eprintln!();
    }
    miette::Report::new(error)
}

/// Output format for version command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::parse_from([
            "stagegate", "run", "--stage", "build", "--event", "tag", "--ref", "v1.0.0", "-j", "2",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.stage, vec!["build"]);
        assert_eq!(args.jobs, 2);
        assert_eq!(args.trigger.event, Some(TriggerKind::TagPush));
    }

    #[test]
    fn test_default_trigger_is_manual() {
        let args = TriggerArgs {
            commit: Some("a1b2c3d4ef".into()),
            ..Default::default()
        };
        let trigger = args.to_trigger().unwrap();
        assert_eq!(trigger.kind, TriggerKind::Manual);
        assert_eq!(trigger.ref_name, "");
    }

    #[test]
    fn test_tag_trigger_needs_no_commit() {
        let args = TriggerArgs {
            event: Some(TriggerKind::TagPush),
            ref_name: Some("v1.2.3".into()),
            ..Default::default()
        };
        assert_eq!(args.to_trigger().unwrap(), Trigger::tag_push("v1.2.3"));
    }
}
