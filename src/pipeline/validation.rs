// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Pipeline validation
//!
//! Validates pipeline configuration before execution.

use std::collections::HashSet;

use crate::errors::StagegateError;
use crate::pipeline::{stage_name_problem, Action, GatingPolicy, Pipeline, PipelineGraph, Stage};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline configuration
    pub fn validate(pipeline: &Pipeline) -> ValidationResult {
        let mut result = ValidationResult::new();

        // Check for empty stages
        if pipeline.stages.is_empty() {
            result.add_error("Pipeline has no stages defined");
        }

        if pipeline.default_branch.trim().is_empty() {
            result.add_error("default_branch must not be empty");
        }

        // Graph structure: duplicates, unknown dependencies, cycles, artifact wiring
        let graph = match Self::build_graph(pipeline) {
            Ok(graph) => Some(graph),
            // Reported per stage below
            Err(StagegateError::InvalidStage { .. }) => None,
            Err(e) => {
                result.add_error(&e.to_string());
                None
            }
        };

        for stage in &pipeline.stages {
            Self::validate_stage(stage, &mut result);
        }

        if let Some(graph) = graph {
            Self::check_artifact_edges(pipeline, &graph, &mut result);
        }

        result
    }

    fn build_graph(pipeline: &Pipeline) -> Result<PipelineGraph, StagegateError> {
        let mut graph = PipelineGraph::new();
        for stage in &pipeline.stages {
            graph.add_stage(stage.clone())?;
        }
        graph.topological_levels()?;
        Ok(graph)
    }

    /// Validate a single stage
    fn validate_stage(stage: &Stage, result: &mut ValidationResult) {
        if let Some(reason) = stage_name_problem(&stage.name) {
            result.add_error(&format!("Stage '{}': {}", stage.name, reason));
        }

        match &stage.action {
            Action::Shell { command, shell } => {
                if command.trim().is_empty() {
                    result.add_error(&format!("Stage '{}': Shell command is empty", stage.name));
                }
                if shell.trim().is_empty() {
                    result.add_error(&format!("Stage '{}': Shell is empty", stage.name));
                }
            }
            Action::Task { task } => {
                if task.trim().is_empty() {
                    result.add_error(&format!("Stage '{}': Task name is empty", stage.name));
                }
            }
        }

        if stage.timeout_secs == Some(0) {
            result.add_error(&format!("Stage '{}': timeout_secs must be positive", stage.name));
        }

        if stage.gate == GatingPolicy::OnFailure && stage.depends_on.is_empty() {
            result.add_warning(&format!(
                "Stage '{}': gated on_failure but has no dependencies, so it never runs",
                stage.name
            ));
        }

        let mut seen = HashSet::new();
        for dep in &stage.depends_on {
            if !seen.insert(dep) {
                result.add_warning(&format!(
                    "Stage '{}': Dependency '{}' listed more than once",
                    stage.name, dep
                ));
            }
        }
    }

    /// Warn about artifact wiring that works but is likely unintended
    fn check_artifact_edges(pipeline: &Pipeline, graph: &PipelineGraph, result: &mut ValidationResult) {
        let mut consumed = HashSet::new();

        for stage in &pipeline.stages {
            for artifact in &stage.requires {
                consumed.insert(artifact.as_str());

                let Some(producer) = graph.producer_of(artifact) else {
                    continue;
                };
                if !stage.depends_on.iter().any(|d| d == producer) {
                    result.add_warning(&format!(
                        "Stage '{}': Requires '{}' from '{}' through an indirect dependency. \
                         Consider depending on '{}' directly.",
                        stage.name, artifact, producer, producer
                    ));
                }
            }
        }

        for stage in &pipeline.stages {
            for artifact in &stage.produces {
                if !consumed.contains(artifact.as_str()) {
                    result.add_warning(&format!(
                        "Stage '{}': Artifact '{}' is never required by another stage",
                        stage.name, artifact
                    ));
                }
            }
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_pipeline() {
        let pipeline = Pipeline::new("empty", vec![]);

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no stages"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let pipeline = Pipeline::new(
            "test",
            vec![Stage::shell("dup", "echo a"), Stage::shell("dup", "echo b")],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("already registered")));
    }

    #[test]
    fn test_validate_cycle() {
        let pipeline = Pipeline::new(
            "test",
            vec![
                Stage::shell("a", "true").after(["b"]),
                Stage::shell("b", "true").after(["a"]),
            ],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.errors.iter().any(|e| e.contains("Circular dependency")));
    }

    #[test]
    fn test_validate_rejects_path_like_stage_names() {
        let victim = std::env::temp_dir().join("victim");
        let pipeline = Pipeline::new(
            "test",
            vec![
                Stage::shell(victim.to_string_lossy(), "true"),
                Stage::shell("..", "true"),
                Stage::shell("a/in", "true"),
            ],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
    }

    #[test]
    fn test_validate_empty_command() {
        let pipeline = Pipeline::new("test", vec![Stage::shell("a", " ")]);

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.errors.iter().any(|e| e.contains("Shell command is empty")));
    }

    #[test]
    fn test_indirect_artifact_dependency_warns() {
        let pipeline = Pipeline::new(
            "test",
            vec![
                Stage::shell("data", "true").produces(["featured.csv"]),
                Stage::shell("training", "true").after(["data"]),
                Stage::shell("report", "true")
                    .after(["training"])
                    .requires(["featured.csv"]),
            ],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("indirect dependency")));
    }

    #[test]
    fn test_unused_artifact_and_orphan_handler_warn() {
        let pipeline = Pipeline::new(
            "test",
            vec![
                Stage::shell("data", "true").produces(["featured.csv"]),
                Stage::shell("notify", "true").gate(GatingPolicy::OnFailure),
            ],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("never required")));
        assert!(result.warnings.iter().any(|w| w.contains("never runs")));
    }

    #[test]
    fn test_artifact_from_unrelated_stage_is_error() {
        let pipeline = Pipeline::new(
            "test",
            vec![
                Stage::shell("data", "true").produces(["featured.csv"]),
                Stage::shell("training", "true").requires(["featured.csv"]),
            ],
        );

        let result = PipelineValidator::validate(&pipeline);
        assert!(!result.is_valid());
    }
}
