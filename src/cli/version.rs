// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Version command - print the tags a trigger resolves to

use miette::Result;
use std::path::PathBuf;

use super::{load_pipeline, report_error, OutputFormat, TriggerArgs};
use crate::version::VersionResolver;

/// Run the version command
pub async fn run(
    trigger: TriggerArgs,
    default_branch: Option<String>,
    pipeline_path: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let default_branch = match default_branch {
        Some(branch) => branch,
        None if pipeline_path.exists() => load_pipeline(&pipeline_path)?.default_branch,
        None => "main".to_string(),
    };

    let trigger = trigger.to_trigger()?;
    let tag = VersionResolver::new(default_branch)
        .resolve(&trigger)
        .map_err(report_error)?;

    match format {
        OutputFormat::Text => {
            for tag in tag.tags() {
                println!("{}", tag);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "trigger": trigger,
                "primary": tag.primary,
                "aliases": tag.aliases,
            });
            let rendered = serde_json::to_string_pretty(&json)
                .map_err(|e| miette::miette!("Failed to render JSON: {}", e))?;
            println!("{}", rendered);
        }
    }

    Ok(())
}
