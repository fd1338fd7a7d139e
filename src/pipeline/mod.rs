// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Pipeline definitions, graph and engine
//!
//! This module defines stages and their gating, the dependency graph that
//! orders them, and the engine that executes a run level by level.

mod cancellation;
mod dag;
mod definition;
mod engine;
pub mod outcome;
mod validation;

pub use cancellation::CancellationToken;
pub use dag::PipelineGraph;
pub use definition::*;
pub use engine::{
    resolve_version, ExecutionOptions, PipelineEngine, RunResult, DEFAULT_SCRATCH_DIR,
};
pub use outcome::{ExitInfo, Run, RunReport, RunState, SkipCause, StageOutcome, StageRecord};
pub use validation::{PipelineValidator, ValidationResult};
