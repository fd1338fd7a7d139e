// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Stage outcomes, run state and the archived run report

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::artifacts::ArtifactSummary;
use crate::errors::StagegateError;
use crate::version::{Trigger, VersionTag};

/// Reason used when a stage succeeds without publishing a declared output
pub const MISSING_DECLARED_ARTIFACT: &str = "missing declared artifact";

/// Reason used when a declared output is published with no content
pub const EMPTY_DECLARED_ARTIFACT: &str = "empty declared artifact";

/// Terminal result of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Success {
        produced_artifacts: Vec<String>,
    },
    Failure {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_info: Option<ExitInfo>,
    },
    Skipped {
        cause: SkipCause,
    },
}

impl StageOutcome {
    /// Failure without process exit details
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            exit_info: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Failure reason, if this is a failure
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failure { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Short label for console output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "succeeded",
            Self::Failure { .. } => "failed",
            Self::Skipped {
                cause: SkipCause::DependencyOutcome,
            } => "skipped",
            Self::Skipped {
                cause: SkipCause::Cancelled,
            } => "cancelled",
        }
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipCause {
    /// The gating policy's precondition on dependency outcomes did not hold
    #[serde(rename = "dependency outcome")]
    DependencyOutcome,
    /// The run was cancelled before the stage finished
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl std::fmt::Display for SkipCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependencyOutcome => write!(f, "dependency outcome"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Process exit details attached to a failure
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Tail of the captured standard error
    #[serde(default)]
    pub stderr: String,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallySucceeded,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::PartiallySucceeded
        )
    }

    fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::PartiallySucceeded => "partially succeeded",
        };
        f.write_str(s)
    }
}

/// Recorded outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    /// Zero-based topological level
    pub level: usize,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
}

/// One execution of a pipeline graph
///
/// Outcomes are write-once: recording a second outcome for a stage is
/// rejected, so what the engine observed is what the report shows.
#[derive(Debug)]
pub struct Run {
    pipeline: String,
    trigger: Trigger,
    version: VersionTag,
    state: RunState,
    records: Vec<StageRecord>,
    index: HashMap<String, usize>,
    cancelled: bool,
    started_at: SystemTime,
}

impl Run {
    /// Create a pending run
    pub fn new(pipeline: impl Into<String>, trigger: Trigger, version: VersionTag) -> Self {
        Self {
            pipeline: pipeline.into(),
            trigger,
            version,
            state: RunState::Pending,
            records: Vec::new(),
            index: HashMap::new(),
            cancelled: false,
            started_at: SystemTime::now(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    /// Move to the next lifecycle state
    pub fn transition(&mut self, next: RunState) -> Result<(), StagegateError> {
        if !self.state.can_transition_to(next) {
            return Err(StagegateError::ExecutionFailed {
                message: format!("invalid run transition {} -> {}", self.state, next),
                help: None,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a stage outcome
    pub fn record(
        &mut self,
        name: &str,
        level: usize,
        outcome: StageOutcome,
        duration: Duration,
    ) -> Result<(), StagegateError> {
        if self.index.contains_key(name) {
            return Err(StagegateError::ExecutionFailed {
                message: format!("outcome of stage '{}' already recorded", name),
                help: None,
            });
        }

        self.index.insert(name.to_string(), self.records.len());
        self.records.push(StageRecord {
            name: name.to_string(),
            level,
            outcome,
            duration_ms: duration.as_millis() as u64,
        });
        Ok(())
    }

    /// Outcome recorded for a stage
    pub fn outcome(&self, name: &str) -> Option<&StageOutcome> {
        self.index.get(name).map(|&i| &self.records[i].outcome)
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Archive the finished run
    pub fn into_report(
        self,
        artifacts: Vec<ArtifactSummary>,
        duration: Duration,
        pipeline_digest: Option<String>,
    ) -> RunReport {
        RunReport {
            pipeline: self.pipeline,
            pipeline_digest,
            trigger: self.trigger,
            version: self.version,
            state: self.state,
            cancelled: self.cancelled,
            stages: self.records,
            artifacts,
            started_at: self.started_at,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Archived result of a run: the only externally reported state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_digest: Option<String>,
    pub trigger: Trigger,
    pub version: VersionTag,
    pub state: RunState,
    pub cancelled: bool,
    pub stages: Vec<StageRecord>,
    pub artifacts: Vec<ArtifactSummary>,
    pub started_at: SystemTime,
    pub duration_ms: u64,
}

impl RunReport {
    /// Outcome of a stage
    pub fn outcome(&self, name: &str) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    /// Whether the run fully succeeded
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String, StagegateError> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}
