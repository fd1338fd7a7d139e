// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest fixing a dependency cycle
    pub fn fix_cycle(stages: &[String]) -> Self {
        Self {
            action: "Remove circular dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", stages.join(" → ")),
                "Review the `depends_on` lists of the stages above".into(),
                "Ensure stages form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize your pipeline:".into(),
                "stagegate graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest giving an artifact a single producer
    pub fn split_producer(artifact: &str, first: &str, second: &str) -> Self {
        Self {
            action: format!("Give artifact '{}' a single producer", artifact),
            steps: vec![
                format!("Both '{}' and '{}' declare '{}' in `produces`", first, second, artifact),
                "Rename one of the outputs, or let one stage consume the other's".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest declaring a missing dependency edge
    pub fn add_dependency(stage: &str, producer: &str) -> Self {
        Self {
            action: format!("Make '{}' depend on '{}'", stage, producer),
            steps: vec![
                format!(
                    "'{}' consumes an artifact of '{}' but may run before it",
                    stage, producer
                ),
                format!("Add '{}' to the `depends_on` list of '{}'", producer, stage),
            ],
            commands: vec![
                "# Check the resulting execution levels:".into(),
                "stagegate graph".into(),
            ],
        }
    }

    /// Suggest fixing a malformed trigger
    pub fn fix_trigger() -> Self {
        Self {
            action: "Provide a well-formed trigger".into(),
            steps: vec![
                "Tag pushes must reference a tag like v1.2.3".into(),
                "Branch pushes need a branch name and a commit of at least 8 hex characters".into(),
            ],
            commands: vec![
                "# Resolve the version tag without running anything:".into(),
                "stagegate version --event branch_push --ref main --commit a1b2c3d4ef".into(),
            ],
        }
    }

    /// Suggest creating a pipeline file
    pub fn create_pipeline() -> Self {
        Self {
            action: "Create a pipeline definition".into(),
            steps: vec![
                "No .stagegate.yaml found in current directory".into(),
                "Initialize a new project or create the file manually".into(),
            ],
            commands: vec![
                "# Minimal pipeline:".into(),
                "stagegate init".into(),
                "".into(),
                "# Security → data → training → build template:".into(),
                "stagegate init --template ml-delivery".into(),
            ],
        }
    }

    /// Suggest registering an in-process task
    pub fn register_runner(runner: &str) -> Self {
        Self {
            action: format!("Register a runner named '{}'", runner),
            steps: vec![
                "Task stages run closures registered by the embedding program".into(),
                "The stagegate binary only ships the `shell` runner".into(),
            ],
            commands: vec![],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
