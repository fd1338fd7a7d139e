// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! stagegate - Staged Pipeline Orchestrator

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagegate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagegate=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init {
            name,
            template,
            force,
        } => stagegate::cli::init::run(name, template, force, cli.verbose).await,
        Commands::Run(args) => stagegate::cli::run::run(args, cli.verbose).await,
        Commands::Watch { pipeline, debounce } => {
            stagegate::cli::watch::run(pipeline, debounce, cli.verbose).await
        }
        Commands::Validate { pipeline } => {
            stagegate::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            stagegate::cli::graph::run(pipeline, format, cli.verbose).await
        }
        Commands::Version {
            trigger,
            default_branch,
            pipeline,
            format,
        } => stagegate::cli::version::run(trigger, default_branch, pipeline, format).await,
    }
}
