// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Init command - write a starter pipeline

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::DEFAULT_PIPELINE;
use crate::utils;

/// Run the init command
pub async fn run(name: Option<String>, template: String, force: bool, verbose: bool) -> Result<()> {
    let project_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "my-pipeline".to_string())
    });

    println!("{}", "Initializing stagegate pipeline...".bold());
    println!();

    if Path::new(DEFAULT_PIPELINE).exists() && !force {
        return Err(miette::miette!(
            "{} already exists. Use --force to overwrite.",
            DEFAULT_PIPELINE
        ));
    }

    let pipeline_content = match template.as_str() {
        "minimal" => generate_minimal_template(&project_name),
        "ml-delivery" | "ml" => generate_ml_delivery_template(&project_name),
        t => {
            return Err(miette::miette!(
                "Unknown template: '{}'\n\nAvailable templates:\n\
                 • minimal      - Two stages handing over one artifact\n\
                 • ml-delivery  - Security, data, training and build with a frontend branch",
                t
            ));
        }
    };

    std::fs::write(DEFAULT_PIPELINE, &pipeline_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_PIPELINE, e))?;

    utils::print_success(&format!("Created {}", DEFAULT_PIPELINE));

    println!();
    println!("{}", "Pipeline initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to define your stages", DEFAULT_PIPELINE.cyan());
    println!("  2. Run {} to check it", "stagegate validate".cyan());
    println!("  3. Run {} to execute it", "stagegate run".cyan());
    println!();

    if verbose {
        println!("{}", "Generated pipeline:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", pipeline_content.dimmed());
    }

    Ok(())
}

fn generate_minimal_template(name: &str) -> String {
    format!(
        r#"# stagegate pipeline configuration
#
# Stages write declared outputs to $STAGEGATE_OUTPUT_DIR/<artifact> and read
# required inputs from $STAGEGATE_INPUT_DIR/<artifact>.

version: "1"
name: "{name}"
default_branch: main

stages:
  - name: greet
    description: "Produce a greeting"
    action:
      type: shell
      command: echo "hello from $STAGEGATE_VERSION" > "$STAGEGATE_OUTPUT_DIR/greeting.txt"
    produces:
      - greeting.txt

  - name: shout
    description: "Consume the greeting"
    action:
      type: shell
      command: tr a-z A-Z < "$STAGEGATE_INPUT_DIR/greeting.txt"
    depends_on:
      - greet
    requires:
      - greeting.txt
"#
    )
}

fn generate_ml_delivery_template(name: &str) -> String {
    format!(
        r#"# stagegate pipeline - model delivery
#
# security -> data -> training -> build, with an independent frontend
# branch. A failed training run skips the build but leaves the frontend
# artifacts usable.

version: "1"
name: "{name}"
default_branch: main

env:
  PYTHONUNBUFFERED: "1"

watch:
  ignore:
    - "**/.stagegate/**"
    - "**/.git/**"
    - "**/target/**"
    - "**/node_modules/**"

stages:
  - name: security
    description: "Scan dependencies before anything is built"
    action:
      type: shell
      command: echo "scanning dependencies"

  - name: data
    description: "Prepare the training set"
    action:
      type: shell
      command: printf 'sqft,price\n1200,250000\n' > "$STAGEGATE_OUTPUT_DIR/featured.csv"
    depends_on: [security]
    produces: [featured.csv]

  - name: training
    description: "Fit the model"
    action:
      type: shell
      command: wc -l < "$STAGEGATE_INPUT_DIR/featured.csv" > "$STAGEGATE_OUTPUT_DIR/model.bin"
    depends_on: [data]
    requires: [featured.csv]
    produces: [model.bin]
    timeout_secs: 3600

  - name: build
    description: "Package the model image"
    action:
      type: shell
      command: echo "registry.example.com/model:$STAGEGATE_VERSION" > "$STAGEGATE_OUTPUT_DIR/image.ref"
    depends_on: [training]
    requires: [model.bin]
    produces: [image.ref]

  - name: notify-failure
    description: "Report a failed training run"
    gate: on_failure
    action:
      type: shell
      command: echo "training failed for $STAGEGATE_VERSION" >&2
    depends_on: [training]

  - name: frontend-security
    description: "Audit frontend packages"
    action:
      type: shell
      command: echo "auditing frontend packages"

  - name: frontend-build
    description: "Build the frontend bundle"
    action:
      type: shell
      command: echo "registry.example.com/frontend:$STAGEGATE_VERSION" > "$STAGEGATE_OUTPUT_DIR/frontend.ref"
    depends_on: [frontend-security]
    produces: [frontend.ref]
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GatingPolicy, Pipeline, PipelineGraph, PipelineValidator};

    #[test]
    fn test_minimal_template_is_valid() {
        let pipeline = Pipeline::from_yaml(&generate_minimal_template("demo")).unwrap();
        assert_eq!(pipeline.name, "demo");

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_ml_delivery_template_levels() {
        let pipeline = Pipeline::from_yaml(&generate_ml_delivery_template("ml")).unwrap();
        assert!(PipelineValidator::validate(&pipeline).is_valid());
        assert_eq!(
            pipeline.get_stage("notify-failure").unwrap().gate,
            GatingPolicy::OnFailure
        );

        let levels = PipelineGraph::from_pipeline(&pipeline)
            .unwrap()
            .topological_levels()
            .unwrap();
        assert_eq!(levels[0], vec!["frontend-security", "security"]);
        assert_eq!(levels[1], vec!["data", "frontend-build"]);
        assert_eq!(levels[2], vec!["training"]);
        assert_eq!(levels[3], vec!["build", "notify-failure"]);
    }
}
