// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Pipeline engine
//!
//! Drives one run: resolves the version, walks the dependency levels,
//! runs every stage of a level concurrently and waits for all of them
//! before starting the next level. Stage faults stay inside their stage;
//! the run's terminal state is derived from the recorded outcomes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::cancellation::CancellationToken;
use super::dag::PipelineGraph;
use super::definition::{GatingPolicy, Pipeline, Stage};
use super::outcome::{Run, RunReport, RunState, SkipCause, StageOutcome};
use crate::artifacts::{ArtifactStore, ContentHasher};
use crate::errors::{StagegateError, StagegateResult};
use crate::executors::{StageExecutor, StageInputs};
use crate::version::{Trigger, VersionResolver, VersionTag};

/// Default scratch directory, relative to the working directory
pub const DEFAULT_SCRATCH_DIR: &str = ".stagegate/work";

/// Pipeline execution options
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Directory stages run in
    pub working_dir: PathBuf,
    /// Root of the per-stage scratch directories
    pub scratch_dir: PathBuf,
    /// Maximum stages running at once (0 = a whole level)
    pub max_parallel: usize,
    /// Cancel the run after this long
    pub timeout: Option<Duration>,
    /// Only run these stages and their upstream
    pub targets: Vec<String>,
    /// Leave the per-stage scratch directories on disk after the run
    pub keep_scratch: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            max_parallel: 0,
            timeout: None,
            targets: Vec::new(),
            keep_scratch: false,
        }
    }
}

/// Finished run: its report and the artifacts it published
#[derive(Debug)]
pub struct RunResult {
    pub report: RunReport,
    pub artifacts: Arc<ArtifactStore>,
}

/// Runs pipelines
#[derive(Clone)]
pub struct PipelineEngine {
    executor: Arc<StageExecutor>,
}

impl PipelineEngine {
    pub fn new(executor: StageExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    /// Graph and levels a run of `pipeline` would execute
    pub fn plan(
        pipeline: &Pipeline,
        options: &ExecutionOptions,
    ) -> StagegateResult<(PipelineGraph, Vec<Vec<String>>)> {
        let mut graph = PipelineGraph::from_pipeline(pipeline)?;
        if !options.targets.is_empty() {
            graph = graph.restricted_to(&options.targets)?;
        }
        let levels = graph.topological_levels()?;
        Ok((graph, levels))
    }

    /// Run a pipeline to completion
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        trigger: &Trigger,
        options: &ExecutionOptions,
    ) -> StagegateResult<RunResult> {
        self.run_with_cancel(pipeline, trigger, options, CancellationToken::new())
            .await
    }

    /// Run a pipeline, stopping early when `cancel` fires
    ///
    /// Errors are returned only for problems found before any stage starts
    /// (invalid graph, unrecognized trigger). Everything after that is
    /// reported through the [`RunReport`].
    pub async fn run_with_cancel(
        &self,
        pipeline: &Pipeline,
        trigger: &Trigger,
        options: &ExecutionOptions,
        cancel: CancellationToken,
    ) -> StagegateResult<RunResult> {
        let start = Instant::now();
        let version = resolve_version(pipeline, trigger)?;
        let (graph, levels) = Self::plan(pipeline, options)?;
        let digest = ContentHasher::new().hash_pipeline(pipeline).ok();
        let working_dir = absolute(&options.working_dir)?;
        let scratch_root = working_dir.join(&options.scratch_dir);

        let span = info_span!("run", pipeline = %pipeline.name, version = %version.primary);

        async move {
            let store = Arc::new(ArtifactStore::new());
            let mut run = Run::new(&pipeline.name, trigger.clone(), version.clone());
            run.transition(RunState::Running)?;
            info!(stages = graph.len(), levels = levels.len(), "run started");

            let semaphore =
                (options.max_parallel > 0).then(|| Arc::new(Semaphore::new(options.max_parallel)));
            let timer = options.timeout.map(|limit| {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    cancel.cancel(format!("run timed out after {}s", limit.as_secs()));
                })
            });

            let mut scratch_dirs = Vec::new();

            for (level, names) in levels.iter().enumerate() {
                debug!(level, stages = ?names, "starting level");
                let mut handles: Vec<(String, JoinHandle<(StageOutcome, Duration)>)> =
                    Vec::with_capacity(names.len());

                for name in names {
                    let Some(stage) = graph.stage(name) else {
                        continue;
                    };

                    if cancel.is_cancelled() {
                        run.record(name, level, skipped(SkipCause::Cancelled), Duration::ZERO)?;
                        continue;
                    }

                    if !gate_open(stage, &graph, &run) {
                        info!(stage = %name, gate = %stage.gate, "skipped by gating policy");
                        run.record(
                            name,
                            level,
                            skipped(SkipCause::DependencyOutcome),
                            Duration::ZERO,
                        )?;
                        continue;
                    }

                    let scratch = scratch_root.join(&stage.name);
                    scratch_dirs.push(scratch.clone());
                    let inputs = StageInputs::new(
                        working_dir.clone(),
                        scratch,
                        merged_env(pipeline, stage),
                        version.clone(),
                    );
                    let handle = spawn_stage(
                        Arc::clone(&self.executor),
                        Arc::clone(&store),
                        stage.clone(),
                        inputs,
                        cancel.clone(),
                        semaphore.clone(),
                        level,
                    );
                    handles.push((name.clone(), handle));
                }

                // Level barrier
                for (name, handle) in handles {
                    let (outcome, duration) = match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => {
                            warn!(stage = %name, "stage panicked");
                            (StageOutcome::failure("stage panicked"), Duration::ZERO)
                        }
                        Err(_) => (skipped(SkipCause::Cancelled), Duration::ZERO),
                    };

                    match &outcome {
                        StageOutcome::Failure { reason, .. } => {
                            warn!(stage = %name, reason = %reason, "stage failed")
                        }
                        other => info!(
                            stage = %name,
                            outcome = other.label(),
                            duration_ms = duration.as_millis() as u64,
                            "stage finished"
                        ),
                    }
                    run.record(&name, level, outcome, duration)?;
                }
            }

            if let Some(timer) = timer {
                timer.abort();
            }

            if !options.keep_scratch {
                clear_scratch(&working_dir, &scratch_root, &scratch_dirs).await;
            }

            if cancel.is_cancelled() {
                run.mark_cancelled();
            }

            let state = aggregate_state(&graph, &run);
            run.transition(state)?;

            let report = run.into_report(store.summaries().await, start.elapsed(), digest);
            info!(
                state = %report.state,
                tags = %report.version,
                duration_ms = report.duration_ms,
                "run finished"
            );

            Ok::<_, StagegateError>(RunResult {
                report,
                artifacts: store,
            })
        }
        .instrument(span)
        .await
    }
}

fn spawn_stage(
    executor: Arc<StageExecutor>,
    store: Arc<ArtifactStore>,
    stage: Stage,
    inputs: StageInputs,
    cancel: CancellationToken,
    semaphore: Option<Arc<Semaphore>>,
    level: usize,
) -> JoinHandle<(StageOutcome, Duration)> {
    let span = info_span!("stage", stage = %stage.name, level);

    tokio::spawn(
        async move {
            let started = Instant::now();

            let _permit = match semaphore {
                Some(semaphore) => tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => {
                        return (skipped(SkipCause::Cancelled), started.elapsed());
                    }
                },
                None => None,
            };

            if cancel.is_cancelled() {
                return (skipped(SkipCause::Cancelled), started.elapsed());
            }

            debug!("stage started");
            let outcome = tokio::select! {
                // A stage that has finished keeps its outcome
                biased;
                outcome = executor.run_stage(&stage, &store, inputs) => outcome,
                _ = cancel.cancelled() => skipped(SkipCause::Cancelled),
            };

            (outcome, started.elapsed())
        }
        .instrument(span),
    )
}

fn skipped(cause: SkipCause) -> StageOutcome {
    StageOutcome::Skipped { cause }
}

/// Whether a stage's gating policy lets it run, given its dependencies' outcomes
fn gate_open(stage: &Stage, graph: &PipelineGraph, run: &Run) -> bool {
    let deps = graph.dependencies(&stage.name).unwrap_or_default();
    let outcomes: Vec<&StageOutcome> = deps.iter().filter_map(|d| run.outcome(d)).collect();

    match stage.gate {
        GatingPolicy::OnSuccess => outcomes.iter().all(|o| o.is_success()),
        GatingPolicy::Always => true,
        GatingPolicy::OnFailure => outcomes.iter().any(|o| o.is_failure()),
    }
}

/// Terminal state of a run from its recorded outcomes
///
/// A failure is handled when a direct dependent gated `always` or
/// `on_failure` exists to react to it. Unhandled failures fail the run
/// unless some independent branch finished with no failure and at least
/// one success.
pub(crate) fn aggregate_state(graph: &PipelineGraph, run: &Run) -> RunState {
    if run.is_cancelled() {
        return RunState::Failed;
    }

    let failed: Vec<&str> = run
        .records()
        .iter()
        .filter(|r| r.outcome.is_failure())
        .map(|r| r.name.as_str())
        .collect();

    if failed.is_empty() {
        return RunState::Succeeded;
    }

    let handled = |name: &str| {
        graph
            .dependents(name)
            .unwrap_or_default()
            .iter()
            .filter_map(|d| graph.stage(d))
            .any(|s| s.gate.handles_failure())
    };

    if failed.iter().all(|name| handled(name)) {
        return RunState::PartiallySucceeded;
    }

    let outcome_of = |name: &String| run.outcome(name);
    let clean_branch = graph.branches().iter().any(|branch| {
        branch
            .iter()
            .all(|s| !outcome_of(s).is_some_and(StageOutcome::is_failure))
            && branch
                .iter()
                .any(|s| outcome_of(s).is_some_and(StageOutcome::is_success))
    });

    if clean_branch {
        RunState::PartiallySucceeded
    } else {
        RunState::Failed
    }
}

/// Remove the scratch directories a run created, then any parents inside
/// the working directory that are left empty
async fn clear_scratch(working_dir: &Path, root: &Path, dirs: &[PathBuf]) {
    for dir in dirs {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!(dir = %dir.display(), "removed scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory"),
        }
    }

    let mut dir = Some(root);
    while let Some(current) = dir.filter(|d| d.starts_with(working_dir) && *d != working_dir) {
        // Fails once the directory holds anything else
        if tokio::fs::remove_dir(current).await.is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn merged_env(pipeline: &Pipeline, stage: &Stage) -> HashMap<String, String> {
    let mut env = pipeline.env.clone();
    env.extend(stage.env.clone());
    env
}

fn absolute(path: &Path) -> StagegateResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Version tag a trigger would get under a pipeline's default branch
pub fn resolve_version(pipeline: &Pipeline, trigger: &Trigger) -> StagegateResult<VersionTag> {
    VersionResolver::new(&pipeline.default_branch).resolve(trigger)
}
