// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Shell runner
//!
//! Runs a stage's command through a shell. Required artifacts are written
//! to `$STAGEGATE_INPUT_DIR/<name>` before the command starts, and declared
//! outputs are read back from `$STAGEGATE_OUTPUT_DIR/<name>` afterwards.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use super::{Runner, RunnerOutput, StageInputs};
use crate::artifacts::artifact_relative_path;
use crate::errors::StagegateError;
use crate::pipeline::{Action, Stage};

/// Shell runner
pub struct ShellRunner;

impl ShellRunner {
    /// Create a new shell runner
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn artifact_path(stage: &Stage, root: &Path, name: &str) -> Result<PathBuf, StagegateError> {
    artifact_relative_path(name)
        .map(|rel| root.join(rel))
        .ok_or_else(|| StagegateError::InvalidStage {
            stage: stage.name.clone(),
            reason: format!("artifact name '{}' cannot be used as a file path", name),
        })
}

async fn reset_dir(path: &Path) -> Result<(), StagegateError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(StagegateError::FileWriteError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
        }
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| StagegateError::FileWriteError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

async fn write_file(path: &Path, payload: &[u8]) -> Result<(), StagegateError> {
    let to_err = |e: std::io::Error| StagegateError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(path, payload).await.map_err(to_err)
}

#[async_trait]
impl Runner for ShellRunner {
    async fn run(&self, stage: &Stage, inputs: &StageInputs) -> Result<RunnerOutput, StagegateError> {
        let Action::Shell { command, shell } = &stage.action else {
            return Err(StagegateError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Expected a shell action".to_string(),
            });
        };

        let input_dir = inputs.scratch_dir.join("in");
        let output_dir = inputs.scratch_dir.join("out");
        reset_dir(&input_dir).await?;
        reset_dir(&output_dir).await?;

        for (name, artifact) in &inputs.artifacts {
            let path = artifact_path(stage, &input_dir, name)?;
            write_file(&path, artifact.payload()).await?;
        }

        let start = Instant::now();

        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(&inputs.working_dir);
        cmd.envs(&inputs.env);
        cmd.env("STAGEGATE_STAGE", &stage.name)
            .env("STAGEGATE_INPUT_DIR", &input_dir)
            .env("STAGEGATE_OUTPUT_DIR", &output_dir)
            .env("STAGEGATE_VERSION", &inputs.version.primary)
            .env("STAGEGATE_TAGS", inputs.version.tags().join(","));
        // Dropping the future (timeout, cancellation) must not leave the child running
        cmd.kill_on_drop(true);

        debug!(stage = %stage.name, shell = %shell, "spawning shell command");

        let output = cmd.output().await.map_err(|e| StagegateError::RunnerFailed {
            runner: "shell".to_string(),
            error: e.to_string(),
            help: Some(format!("Shell '{}' may not be available", shell)),
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Ok(RunnerOutput {
                stdout,
                ..RunnerOutput::failure(stderr, output.status.code(), duration)
            });
        }

        let mut artifacts = Vec::with_capacity(stage.produces.len());
        for name in &stage.produces {
            let path = artifact_path(stage, &output_dir, name)?;
            if path.is_file() {
                let payload = tokio::fs::read(&path)
                    .await
                    .map_err(|e| StagegateError::FileReadError {
                        path: path.clone(),
                        error: e.to_string(),
                    })?;
                artifacts.push((name.clone(), payload));
            }
        }

        Ok(RunnerOutput {
            stdout,
            stderr,
            ..RunnerOutput::success(artifacts, duration)
        })
    }

    async fn check_available(&self) -> Result<bool, StagegateError> {
        Ok(which::which("bash").is_ok() || which::which("sh").is_ok())
    }

    fn validate_stage(&self, stage: &Stage) -> Result<(), StagegateError> {
        let Action::Shell { command, shell } = &stage.action else {
            return Err(StagegateError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Not a shell stage".to_string(),
            });
        };

        if command.trim().is_empty() {
            return Err(StagegateError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Shell command is empty".to_string(),
            });
        }

        if which::which(shell).is_err() {
            return Err(StagegateError::InvalidStage {
                stage: stage.name.clone(),
                reason: format!("Shell '{}' not found on PATH", shell),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::executors::StageExecutor;
    use crate::version::VersionTag;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn inputs(dir: &TempDir, stage: &str) -> StageInputs {
        StageInputs::new(
            dir.path().to_path_buf(),
            dir.path().join(".stagegate/work").join(stage),
            HashMap::from([("GREETING".to_string(), "hello".to_string())]),
            VersionTag::new("v1.2.3", vec!["latest".into()]),
        )
    }

    #[test]
    fn test_validate_shell_stage() {
        let runner = ShellRunner::new();
        assert!(runner.validate_stage(&Stage::shell("test", "echo hello")).is_ok());
        assert!(runner.validate_stage(&Stage::shell("test", "  ")).is_err());
        assert!(runner.validate_stage(&Stage::task("test", "x")).is_err());
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let dir = TempDir::new().unwrap();
        let stage = Stage::shell("test", "echo $GREETING $STAGEGATE_VERSION");

        let result = ShellRunner::new()
            .run(&stage, &inputs(&dir, "test"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello v1.2.3");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let stage = Stage::shell("test", "echo broken >&2; exit 3");

        let result = ShellRunner::new()
            .run(&stage, &inputs(&dir, "test"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stderr.contains("broken"));
    }

    #[tokio::test]
    async fn test_artifacts_flow_through_directories() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        store
            .publish("reports/raw.csv", b"x,y".to_vec(), "data")
            .await
            .unwrap();

        let stage = Stage::shell(
            "featurize",
            "tr a-z A-Z < \"$STAGEGATE_INPUT_DIR/reports/raw.csv\" > \"$STAGEGATE_OUTPUT_DIR/featured.csv\"",
        )
        .requires(["reports/raw.csv"])
        .produces(["featured.csv"]);

        let outcome = StageExecutor::with_default_runners()
            .run_stage(&stage, &store, inputs(&dir, "featurize"))
            .await;

        assert!(outcome.is_success(), "{:?}", outcome);
        assert_eq!(store.fetch("featured.csv").await.unwrap().payload(), b"X,Y");
    }

    #[tokio::test]
    async fn test_missing_output_file_fails_stage() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let stage = Stage::shell("model", "true").produces(["model.bin"]);

        let outcome = StageExecutor::with_default_runners()
            .run_stage(&stage, &store, inputs(&dir, "model"))
            .await;

        assert_eq!(outcome.reason(), Some("missing declared artifact"));
        assert!(!store.contains("model.bin").await);
    }
}
