// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Pipeline definition structures
//!
//! Defines the schema for .stagegate.yaml files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path};
use std::time::Duration;

use crate::errors::StagegateError;

/// Pipeline definition from .stagegate.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Branch whose pushes produce `<branch>-<commit>` tags
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Stages (order is irrelevant, `depends_on` decides)
    pub stages: Vec<Stage>,

    /// Global environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Watch mode configuration
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Pipeline {
    /// Create a pipeline with default settings
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            version: default_version(),
            name: name.into(),
            description: None,
            default_branch: default_branch(),
            stages,
            env: HashMap::new(),
            watch: WatchConfig::default(),
        }
    }

    /// Load pipeline from a YAML or TOML file (chosen by extension)
    pub fn from_file(path: &Path) -> Result<Self, StagegateError> {
        if !path.exists() {
            return Err(StagegateError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| StagegateError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, StagegateError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse pipeline from TOML string
    pub fn from_toml(content: &str) -> Result<Self, StagegateError> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, StagegateError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

}

/// Why `name` cannot name a stage, if it cannot
///
/// Each stage gets a scratch directory named after it, so a name must be
/// exactly one plain path component.
pub fn stage_name_problem(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        return Some("name is empty");
    }
    if name.contains(['/', '\\']) {
        return Some("name contains a path separator");
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part.to_str() == Some(name) => None,
        _ => Some("name must be a single plain path component"),
    }
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name (must be unique within pipeline)
    pub name: String,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// What the stage runs
    pub action: Action,

    /// Stage dependencies (other stage names)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Artifacts that must be published before this stage runs
    #[serde(default)]
    pub requires: Vec<String>,

    /// Artifacts this stage must publish when it succeeds
    #[serde(default)]
    pub produces: Vec<String>,

    /// When the stage runs, based on its dependencies' outcomes
    #[serde(default)]
    pub gate: GatingPolicy,

    /// Environment variables for this stage
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Fail the stage if it runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Accept zero-byte declared outputs
    #[serde(default)]
    pub allow_empty: bool,
}

impl Stage {
    fn with_action(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            description: None,
            action,
            depends_on: vec![],
            requires: vec![],
            produces: vec![],
            gate: GatingPolicy::default(),
            env: HashMap::new(),
            timeout_secs: None,
            allow_empty: false,
        }
    }

    /// A stage running a shell command through bash
    pub fn shell(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(
            name,
            Action::Shell {
                command: command.into(),
                shell: default_shell(),
            },
        )
    }

    /// A stage running a registered in-process task
    pub fn task(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self::with_action(name, Action::Task { task: task.into() })
    }

    /// Set the stage dependencies
    #[must_use]
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the required artifacts
    #[must_use]
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the produced artifacts
    #[must_use]
    pub fn produces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the gating policy
    #[must_use]
    pub fn gate(mut self, gate: GatingPolicy) -> Self {
        self.gate = gate;
        self
    }

    /// Set the stage timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Name of the runner that executes this stage
    pub fn runner_name(&self) -> &str {
        match &self.action {
            Action::Shell { .. } => "shell",
            Action::Task { task } => task,
        }
    }

    /// Stage timeout, if any
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// What a stage executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Shell command
    Shell {
        /// Shell command to run
        command: String,

        /// Shell to use (bash, sh, etc.)
        #[serde(default = "default_shell")]
        shell: String,
    },

    /// In-process task registered with the executor under this name
    Task {
        /// Registered task name
        task: String,
    },
}

fn default_shell() -> String {
    "bash".to_string()
}

/// Rule deciding whether a stage runs given its dependencies' outcomes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatingPolicy {
    /// Run only if every dependency succeeded
    #[default]
    #[serde(alias = "run-on-success", alias = "success")]
    OnSuccess,
    /// Run once every dependency is terminal, whatever the outcome
    #[serde(alias = "run-always")]
    Always,
    /// Run only if at least one dependency failed
    #[serde(alias = "run-on-failure", alias = "failure")]
    OnFailure,
}

impl GatingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnSuccess => "on_success",
            Self::Always => "always",
            Self::OnFailure => "on_failure",
        }
    }

    /// Whether stages with this policy run after an upstream failure
    pub fn handles_failure(&self) -> bool {
        matches!(self, Self::Always | Self::OnFailure)
    }
}

impl std::fmt::Display for GatingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Glob patterns of paths whose changes never trigger a run
    #[serde(default = "default_watch_ignore")]
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ignore: default_watch_ignore(),
        }
    }
}

fn default_watch_ignore() -> Vec<String> {
    vec![
        "**/.stagegate/**".to_string(),
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pipeline() {
        let yaml = r#"
version: "1"
name: "test-pipeline"
stages:
  - name: "security"
    action:
      type: shell
      command: "pip-audit"
"#;

        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.name, "test-pipeline");
        assert_eq!(pipeline.default_branch, "main");
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].gate, GatingPolicy::OnSuccess);
        assert_eq!(pipeline.stages[0].runner_name(), "shell");
    }

    #[test]
    fn test_parse_artifacts_and_gates() {
        let yaml = r#"
name: "ml"
default_branch: "trunk"
stages:
  - name: "data"
    action:
      type: shell
      command: "python clean.py"
    produces: ["featured.csv", "preprocessor.pkl"]
  - name: "train"
    action:
      type: task
      task: "train-model"
    depends_on: ["data"]
    requires: ["featured.csv"]
  - name: "notify"
    action:
      type: shell
      command: "echo failed"
    depends_on: ["train"]
    gate: run-on-failure
"#;

        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.default_branch, "trunk");

        let train = pipeline.get_stage("train").unwrap();
        assert_eq!(train.runner_name(), "train-model");
        assert_eq!(train.requires, vec!["featured.csv"]);

        let notify = pipeline.get_stage("notify").unwrap();
        assert_eq!(notify.gate, GatingPolicy::OnFailure);
    }

    #[test]
    fn test_parse_toml_pipeline() {
        let content = r#"
name = "frontend"

[[stages]]
name = "security"
action = { type = "shell", command = "npm audit" }

[[stages]]
name = "build-deploy"
action = { type = "shell", command = "npm run build", shell = "sh" }
depends_on = ["security"]
gate = "always"
"#;

        let pipeline = Pipeline::from_toml(content).unwrap();
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[1].gate, GatingPolicy::Always);
        match &pipeline.stages[1].action {
            Action::Shell { shell, .. } => assert_eq!(shell, "sh"),
            _ => panic!("Expected Shell action"),
        }
    }

    #[test]
    fn test_builder_helpers() {
        let stage = Stage::task("train", "trainer")
            .after(["data"])
            .requires(["featured.csv"])
            .produces(["model.pkl"])
            .gate(GatingPolicy::Always)
            .timeout(Duration::from_secs(30));

        assert_eq!(stage.depends_on, vec!["data"]);
        assert_eq!(stage.produces, vec!["model.pkl"]);
        assert_eq!(stage.timeout_duration(), Some(Duration::from_secs(30)));
        assert!(stage.gate.handles_failure());
    }

    #[test]
    fn test_round_trip_yaml() {
        let pipeline = Pipeline::new(
            "test",
            vec![Stage::shell("lint", "ruff check .").produces(["lint.txt"])],
        );

        let yaml = pipeline.to_yaml().unwrap();
        let parsed = Pipeline::from_yaml(&yaml).unwrap();

        assert_eq!(parsed.name, pipeline.name);
        assert_eq!(parsed.stages[0].produces, vec!["lint.txt"]);
    }

    #[test]
    fn test_missing_file() {
        let err = Pipeline::from_file(Path::new("does/not/exist.yaml")).unwrap_err();
        assert!(matches!(err, StagegateError::PipelineNotFound { .. }));
    }

    #[test]
    fn test_stage_names_are_single_components() {
        for name in ["data", "train-model", "build_v2", "notify.slack"] {
            assert_eq!(stage_name_problem(name), None, "{}", name);
        }
        for name in ["", "  ", "/tmp/victim", "..", ".", "a/in", "..\\up", "a/../b"] {
            assert!(stage_name_problem(name).is_some(), "{:?} accepted", name);
        }
    }
}
