// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Trigger descriptors
//!
//! A trigger is the source-control event that started a run. It can be built
//! directly or read from a CI environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::StagegateError;

/// Kind of source-control event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    TagPush,
    BranchPush,
    PullRequest,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TagPush => "tag_push",
            Self::BranchPush => "branch_push",
            Self::PullRequest => "pull_request",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tag_push" | "tag" => Ok(Self::TagPush),
            "branch_push" | "branch" | "push" => Ok(Self::BranchPush),
            "pull_request" | "pr" => Ok(Self::PullRequest),
            "manual" | "workflow_dispatch" => Ok(Self::Manual),
            _ => Err(format!("Unknown trigger kind: {}", s)),
        }
    }
}

/// The event that started a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Tag, branch or pull-request ref (`refs/...` prefixes allowed)
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl Trigger {
    pub fn new(kind: TriggerKind, ref_name: impl Into<String>, commit: impl Into<String>) -> Self {
        let commit = commit.into();
        Self {
            kind,
            ref_name: ref_name.into(),
            commit: if commit.is_empty() { None } else { Some(commit) },
        }
    }

    /// A pushed tag
    pub fn tag_push(tag: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::TagPush,
            ref_name: tag.into(),
            commit: None,
        }
    }

    /// A pushed branch
    pub fn branch_push(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self::new(TriggerKind::BranchPush, branch, commit)
    }

    /// A pull request build
    pub fn pull_request(head: impl Into<String>, commit: impl Into<String>) -> Self {
        Self::new(TriggerKind::PullRequest, head, commit)
    }

    /// A manually started run
    pub fn manual(ref_name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self::new(TriggerKind::Manual, ref_name, commit)
    }

    /// Read the trigger of the current process environment
    pub fn from_ci_env() -> Result<Self, StagegateError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Read a trigger from GitHub Actions style variables
    ///
    /// Uses `GITHUB_EVENT_NAME`, `GITHUB_REF`, `GITHUB_SHA` and, for pull
    /// requests without a `refs/pull/` ref, `GITHUB_HEAD_REF`.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, StagegateError> {
        let get = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let event = get("GITHUB_EVENT_NAME").ok_or_else(|| StagegateError::UnrecognizedTrigger {
            reason: "GITHUB_EVENT_NAME is not set".into(),
        })?;
        let git_ref = get("GITHUB_REF").unwrap_or_default();
        let sha = get("GITHUB_SHA").unwrap_or_default();

        let trigger = match event {
            "push" if git_ref.starts_with("refs/tags/") => Self::tag_push(git_ref),
            "push" if !git_ref.is_empty() => Self::branch_push(git_ref, sha),
            "pull_request" | "pull_request_target" => {
                let head = if git_ref.starts_with("refs/pull/") {
                    git_ref
                } else {
                    get("GITHUB_HEAD_REF").unwrap_or(git_ref)
                };
                Self::pull_request(head, sha)
            }
            "workflow_dispatch" | "schedule" | "repository_dispatch" => Self::manual(git_ref, sha),
            other => {
                return Err(StagegateError::UnrecognizedTrigger {
                    reason: format!("unsupported event '{}' (ref '{}')", other, git_ref),
                })
            }
        };

        Ok(trigger)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.ref_name)?;
        if let Some(ref commit) = self.commit {
            write!(f, " @ {}", commit)?;
        }
        Ok(())
    }
}
