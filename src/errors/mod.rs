// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Error types with actionable diagnostics
//!
//! Graph-construction and trigger errors abort a run before anything is
//! scheduled. Store errors are fatal only to the stage that hit them; the
//! executor turns them into a recorded stage failure.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stagegate operations
pub type StagegateResult<T> = Result<T, StagegateError>;

/// Main error type for stagegate
#[derive(Error, Debug, Diagnostic)]
pub enum StagegateError {
    // ─────────────────────────────────────────────────────────────────────────
    // Graph Construction Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' is already registered")]
    #[diagnostic(
        code(stagegate::duplicate_stage),
        help("Stage names must be unique within a pipeline")
    )]
    DuplicateStage { stage: String },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(
        code(stagegate::unknown_dependency),
        help("Check that '{dependency}' is defined in your pipeline")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("Circular dependency detected: {}", .stages.join(" → "))]
    #[diagnostic(
        code(stagegate::cycle),
        help("Review your stage dependencies to remove the cycle")
    )]
    Cycle { stages: Vec<String> },

    #[error("Artifact '{artifact}' is produced by both '{first}' and '{second}'")]
    #[diagnostic(
        code(stagegate::duplicate_producer),
        help("Every artifact name must have exactly one producing stage")
    )]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' requires artifact '{artifact}' which no stage produces")]
    #[diagnostic(
        code(stagegate::unknown_artifact),
        help("Add '{artifact}' to the `produces` list of an upstream stage")
    )]
    UnknownArtifact { stage: String, artifact: String },

    #[error(
        "Stage '{stage}' requires artifact '{artifact}' but its producer '{producer}' is not upstream"
    )]
    #[diagnostic(
        code(stagegate::artifact_not_upstream),
        help("Add '{producer}' (or a stage depending on it) to the `depends_on` list of '{stage}'")
    )]
    ArtifactNotUpstream {
        stage: String,
        artifact: String,
        producer: String,
    },

    #[error("Stage '{stage}' not found in pipeline")]
    #[diagnostic(code(stagegate::stage_not_found))]
    StageNotFound { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Artifact Store Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Artifact '{artifact}' was already published in this run")]
    #[diagnostic(code(stagegate::duplicate_publish))]
    DuplicatePublish { artifact: String, producer: String },

    #[error("Artifact '{artifact}' has not been published")]
    #[diagnostic(code(stagegate::artifact_not_found))]
    ArtifactNotFound { artifact: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Trigger Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Unrecognized trigger: {reason}")]
    #[diagnostic(
        code(stagegate::unrecognized_trigger),
        help("Tag pushes need a 'v<semver>' ref; branch pushes need a branch and an 8+ hex commit")
    )]
    UnrecognizedTrigger { reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No runner registered for '{runner}'")]
    #[diagnostic(
        code(stagegate::runner_not_found),
        help("Register the task with `StageExecutor::register_runner` or use a shell action")
    )]
    RunnerNotFound { runner: String },

    #[error("Stage '{stage}' is invalid: {reason}")]
    #[diagnostic(code(stagegate::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    #[error("Runner '{runner}' failed: {error}")]
    #[diagnostic(code(stagegate::runner_failed))]
    RunnerFailed {
        runner: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Execution failed: {message}")]
    #[diagnostic(code(stagegate::execution_failed))]
    ExecutionFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(stagegate::pipeline_not_found),
        help("Create a pipeline with 'stagegate init' or write .stagegate.yaml manually")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(stagegate::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(stagegate::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(stagegate::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(stagegate::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(stagegate::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(stagegate::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(stagegate::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for StagegateError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for StagegateError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for StagegateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for StagegateError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl StagegateError {
    /// Whether this error is raised while building the graph, before any stage runs
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStage { .. }
                | Self::UnknownDependency { .. }
                | Self::Cycle { .. }
                | Self::DuplicateProducer { .. }
                | Self::UnknownArtifact { .. }
                | Self::ArtifactNotUpstream { .. }
        )
    }

    /// Recovery suggestion for errors that have a concrete fix
    pub fn recovery(&self) -> Option<RecoverySuggestion> {
        match self {
            Self::Cycle { stages } => Some(RecoverySuggestion::fix_cycle(stages)),
            Self::DuplicateProducer {
                artifact,
                first,
                second,
            } => Some(RecoverySuggestion::split_producer(artifact, first, second)),
            Self::ArtifactNotUpstream {
                stage, producer, ..
            } => Some(RecoverySuggestion::add_dependency(stage, producer)),
            Self::UnrecognizedTrigger { .. } => Some(RecoverySuggestion::fix_trigger()),
            Self::PipelineNotFound { .. } => Some(RecoverySuggestion::create_pipeline()),
            Self::RunnerNotFound { runner } => Some(RecoverySuggestion::register_runner(runner)),
            _ => None,
        }
    }
}
