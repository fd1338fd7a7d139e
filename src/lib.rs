// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! # stagegate - Staged Pipeline Orchestrator
//!
//! `stagegate` runs a dependency graph of stages that hand named artifacts to
//! each other, and tags every run with a version derived from its trigger.
//!
//! ## Features
//!
//! - **Level scheduling** - Independent stages of a level run concurrently
//! - **Artifact gating** - Stages publish write-once artifacts consumed downstream
//! - **Gating policies** - `on_success`, `always` and `on_failure` stages
//! - **Partial success** - A failed branch does not discard healthy ones
//! - **Derived versions** - Tags from tag pushes, branches and pull requests
//!
//! ## Quick Start
//!
//! ```bash
//! # Create a starter pipeline
//! stagegate init --template ml-delivery
//!
//! # Show the levels
//! stagegate graph
//!
//! # Run it as a pull request build
//! stagegate run --event pr --ref refs/pull/42/merge --commit a1b2c3d4ef
//! ```

pub mod artifacts;
pub mod cli;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use artifacts::{Artifact, ArtifactStore};
pub use errors::{StagegateError, StagegateResult};
pub use executors::{Runner, StageExecutor, StageInputs, TaskOutput};
pub use pipeline::{
    CancellationToken, ExecutionOptions, GatingPolicy, Pipeline, PipelineEngine, PipelineGraph,
    RunReport, RunState, Stage, StageOutcome,
};
pub use version::{Trigger, TriggerKind, VersionResolver, VersionTag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
