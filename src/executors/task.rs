// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! In-process task runner
//!
//! Lets library users plug async closures in as stage actions. A task that
//! returns `Err` fails its stage; the error chain becomes the stage's stderr.

use async_trait::async_trait;
use std::future::Future;
use std::time::Instant;

use super::{Runner, RunnerOutput, StageInputs};
use crate::errors::StagegateError;
use crate::pipeline::Stage;

/// Payloads returned by a task
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    artifacts: Vec<(String, Vec<u8>)>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output payload
    #[must_use]
    pub fn artifact(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((name.into(), payload.into()));
        self
    }

    pub fn into_artifacts(self) -> Vec<(String, Vec<u8>)> {
        self.artifacts
    }
}

/// Runner wrapping an async closure
pub struct TaskRunner<F> {
    task: F,
}

impl<F> TaskRunner<F> {
    pub fn new(task: F) -> Self {
        Self { task }
    }
}

#[async_trait]
impl<F, Fut> Runner for TaskRunner<F>
where
    F: Fn(StageInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
{
    async fn run(&self, _stage: &Stage, inputs: &StageInputs) -> Result<RunnerOutput, StagegateError> {
        let start = Instant::now();
        let result = (self.task)(inputs.clone()).await;
        let duration = start.elapsed();

        Ok(match result {
            Ok(output) => RunnerOutput::success(output.into_artifacts(), duration),
            Err(e) => RunnerOutput::failure(format!("{:#}", e), None, duration),
        })
    }
}
