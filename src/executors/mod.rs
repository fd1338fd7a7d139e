// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Stage execution
//!
//! A [`Runner`] does the actual work of a stage (a shell command, an
//! in-process task). The [`StageExecutor`] wraps runners with the stage
//! contract: inputs are resolved before invocation, every fault becomes a
//! [`StageOutcome::Failure`], and declared outputs are published only when
//! the stage succeeds.

mod shell;
mod task;

pub use shell::ShellRunner;
pub use task::{TaskOutput, TaskRunner};

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::artifacts::{Artifact, ArtifactStore};
use crate::errors::StagegateError;
use crate::pipeline::outcome::{EMPTY_DECLARED_ARTIFACT, MISSING_DECLARED_ARTIFACT};
use crate::pipeline::{ExitInfo, Stage, StageOutcome};
use crate::version::VersionTag;

/// Bytes of stderr kept in a failure's exit info
const STDERR_TAIL_BYTES: usize = 4096;

/// Everything a runner gets to see
#[derive(Debug, Clone)]
pub struct StageInputs {
    /// Required artifacts, keyed by name
    pub artifacts: HashMap<String, Artifact>,
    /// Directory the stage runs in
    pub working_dir: PathBuf,
    /// Private scratch directory of this stage
    pub scratch_dir: PathBuf,
    /// Merged pipeline and stage environment
    pub env: HashMap<String, String>,
    /// Version of the run
    pub version: VersionTag,
}

impl StageInputs {
    pub fn new(
        working_dir: PathBuf,
        scratch_dir: PathBuf,
        env: HashMap<String, String>,
        version: VersionTag,
    ) -> Self {
        Self {
            artifacts: HashMap::new(),
            working_dir,
            scratch_dir,
            env,
            version,
        }
    }

    /// A required artifact
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// A required artifact's payload as text
    pub fn text(&self, name: &str) -> Option<&str> {
        self.artifact(name).and_then(Artifact::as_str)
    }
}

/// What a runner reports back
#[derive(Debug, Clone, Default)]
pub struct RunnerOutput {
    /// Whether the work succeeded
    pub success: bool,

    /// Exit code (shell runners)
    pub exit_code: Option<i32>,

    /// Standard output
    pub stdout: String,

    /// Standard error, or the error chain of a failed task
    pub stderr: String,

    /// Output payloads, keyed by artifact name
    pub artifacts: Vec<(String, Vec<u8>)>,

    /// Execution duration
    pub duration: Duration,
}

impl RunnerOutput {
    /// Create a successful result
    pub fn success(artifacts: Vec<(String, Vec<u8>)>, duration: Duration) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            artifacts,
            duration,
            ..Default::default()
        }
    }

    /// Create a failed result
    pub fn failure(stderr: String, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code,
            stderr,
            duration,
            ..Default::default()
        }
    }

    fn failure_reason(&self) -> String {
        match self.exit_code {
            Some(code) if code != 0 => format!("exited with code {}", code),
            _ => self
                .stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| "stage reported failure".to_string()),
        }
    }
}

/// Trait for stage runners
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a stage
    ///
    /// Returning `Err` or an unsuccessful [`RunnerOutput`] both end up as a
    /// stage failure; neither aborts the run.
    async fn run(&self, stage: &Stage, inputs: &StageInputs) -> Result<RunnerOutput, StagegateError>;

    /// Check if the runner can be used on this machine
    async fn check_available(&self) -> Result<bool, StagegateError> {
        Ok(true)
    }

    /// Validate stage configuration
    fn validate_stage(&self, _stage: &Stage) -> Result<(), StagegateError> {
        Ok(())
    }
}

/// Runs stages under the executor contract
#[derive(Clone, Default)]
pub struct StageExecutor {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl StageExecutor {
    /// Create an executor with no runners
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with the built-in `shell` runner
    pub fn with_default_runners() -> Self {
        let mut executor = Self::new();
        executor.register_runner("shell", ShellRunner::new());
        executor
    }

    /// Register a runner under a name
    pub fn register_runner(&mut self, name: &str, runner: impl Runner + 'static) {
        self.runners.insert(name.to_string(), Arc::new(runner));
    }

    /// Register an async closure as a task runner
    pub fn register_task<F, Fut>(&mut self, name: &str, task: F)
    where
        F: Fn(StageInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        self.register_runner(name, TaskRunner::new(task));
    }

    /// Look up a runner
    pub fn runner(&self, name: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(name).cloned()
    }

    /// Fetch the artifacts a stage requires
    pub async fn resolve_inputs(
        &self,
        stage: &Stage,
        store: &ArtifactStore,
    ) -> Result<HashMap<String, Artifact>, StagegateError> {
        let mut artifacts = HashMap::with_capacity(stage.requires.len());
        for name in &stage.requires {
            artifacts.insert(name.clone(), store.fetch(name).await?);
        }
        Ok(artifacts)
    }

    /// Resolve inputs from the store, then execute
    pub async fn run_stage(
        &self,
        stage: &Stage,
        store: &ArtifactStore,
        mut inputs: StageInputs,
    ) -> StageOutcome {
        match self.resolve_inputs(stage, store).await {
            Ok(artifacts) => inputs.artifacts = artifacts,
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "input resolution failed");
                return StageOutcome::failure(e.to_string());
            }
        }

        self.execute(stage, inputs, store).await
    }

    /// Execute a stage with already-resolved inputs
    pub async fn execute(
        &self,
        stage: &Stage,
        inputs: StageInputs,
        store: &ArtifactStore,
    ) -> StageOutcome {
        let Some(runner) = self.runner(stage.runner_name()) else {
            return StageOutcome::failure(
                StagegateError::RunnerNotFound {
                    runner: stage.runner_name().to_string(),
                }
                .to_string(),
            );
        };

        let result = match stage.timeout_duration() {
            Some(limit) => match tokio::time::timeout(limit, runner.run(stage, &inputs)).await {
                Ok(result) => result,
                Err(_) => {
                    return StageOutcome::failure(format!(
                        "timed out after {}s",
                        limit.as_secs()
                    ))
                }
            },
            None => runner.run(stage, &inputs).await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => return StageOutcome::failure(e.to_string()),
        };

        if !output.success {
            return StageOutcome::Failure {
                reason: output.failure_reason(),
                exit_info: Some(ExitInfo {
                    exit_code: output.exit_code,
                    stderr: tail(&output.stderr, STDERR_TAIL_BYTES).to_string(),
                }),
            };
        }

        let mut produced: HashMap<String, Vec<u8>> = output.artifacts.into_iter().collect();
        let mut batch = Vec::with_capacity(stage.produces.len());

        for name in &stage.produces {
            match produced.remove(name) {
                None => {
                    warn!(stage = %stage.name, artifact = %name, "declared artifact not produced");
                    return StageOutcome::failure(MISSING_DECLARED_ARTIFACT);
                }
                Some(payload) if payload.is_empty() && !stage.allow_empty => {
                    warn!(stage = %stage.name, artifact = %name, "declared artifact is empty");
                    return StageOutcome::failure(EMPTY_DECLARED_ARTIFACT);
                }
                Some(payload) => batch.push((name.clone(), payload)),
            }
        }

        for extra in produced.keys() {
            warn!(stage = %stage.name, artifact = %extra, "ignoring undeclared artifact");
        }

        if let Err(e) = store.publish_all(batch, &stage.name).await {
            return StageOutcome::failure(e.to_string());
        }

        debug!(stage = %stage.name, outputs = stage.produces.len(), "stage outputs published");
        StageOutcome::Success {
            produced_artifacts: stage.produces.clone(),
        }
    }

    /// Runner names that are unknown or unavailable for the given stages
    pub async fn missing_runners(&self, stages: &[Stage]) -> Vec<String> {
        let mut names: Vec<&str> = stages.iter().map(Stage::runner_name).collect();
        names.sort_unstable();
        names.dedup();

        let mut missing = Vec::new();
        for name in names {
            match self.runners.get(name) {
                Some(runner) => {
                    if !matches!(runner.check_available().await, Ok(true)) {
                        missing.push(name.to_string());
                    }
                }
                None => missing.push(name.to_string()),
            }
        }

        missing
    }

    /// Let each stage's runner validate its configuration
    pub fn validate_stages(&self, stages: &[Stage]) -> Vec<StagegateError> {
        stages
            .iter()
            .filter_map(|stage| {
                self.runners
                    .get(stage.runner_name())
                    .and_then(|runner| runner.validate_stage(stage).err())
            })
            .collect()
    }
}

/// Last `max` bytes of `s`, on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
