// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Version tag resolution
//!
//! Derives the build tags of a run from its trigger. Resolution is a pure
//! function of the trigger and the configured default branch.

mod trigger;

pub use trigger::{Trigger, TriggerKind};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::errors::StagegateError;

/// Number of commit characters used in tags
pub const SHORT_COMMIT_LEN: usize = 8;

/// Floating alias attached to release and branch builds
pub const LATEST_ALIAS: &str = "latest";

/// Longest tag accepted by container registries
const MAX_TAG_LEN: usize = 128;

fn semver_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^v(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?(\+[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?$",
        )
        .expect("valid semver regex")
    })
}

fn commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{8,64}$").expect("valid commit regex"))
}

/// Tags identifying one build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTag {
    /// Immutable tag of this build
    pub primary: String,
    /// Floating aliases (`latest`)
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl VersionTag {
    pub fn new(primary: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            aliases,
        }
    }

    /// Primary tag followed by its aliases
    pub fn tags(&self) -> Vec<&str> {
        std::iter::once(self.primary.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .collect()
    }

    /// Whether `tag` is the primary tag or an alias
    pub fn contains(&self, tag: &str) -> bool {
        self.primary == tag || self.aliases.iter().any(|a| a == tag)
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tags().join(", "))
    }
}

/// Resolves triggers into version tags
#[derive(Debug, Clone)]
pub struct VersionResolver {
    default_branch: String,
}

impl VersionResolver {
    pub fn new(default_branch: impl Into<String>) -> Self {
        Self {
            default_branch: default_branch.into(),
        }
    }

    /// Derive the version tag of a trigger
    ///
    /// | trigger                | tags                                  |
    /// |------------------------|---------------------------------------|
    /// | tag push `v<semver>`   | `v<semver>`, `latest`                 |
    /// | branch push            | `<slug>-<short>`, `latest`            |
    /// | pull request           | `pr-<slug>-<short>`                   |
    /// | manual                 | `<slug>-<short>` (+`latest` on default) |
    pub fn resolve(&self, trigger: &Trigger) -> Result<VersionTag, StagegateError> {
        let tag = match trigger.kind {
            TriggerKind::TagPush => {
                let name = strip_ref(&trigger.ref_name);
                if !semver_tag_re().is_match(name) {
                    return Err(unrecognized(format!(
                        "tag '{}' does not match v<semver>",
                        trigger.ref_name
                    )));
                }
                VersionTag::new(name, vec![LATEST_ALIAS.to_string()])
            }
            TriggerKind::BranchPush => {
                let branch = strip_ref(&trigger.ref_name);
                if branch.is_empty() {
                    return Err(unrecognized("branch push without a branch name".into()));
                }
                let short = short_commit(trigger)?;
                let prefix = slug(branch, MAX_TAG_LEN - SHORT_COMMIT_LEN - 1)?;
                VersionTag::new(format!("{}-{}", prefix, short), vec![LATEST_ALIAS.to_string()])
            }
            TriggerKind::PullRequest => {
                let head = strip_pull_ref(&trigger.ref_name);
                let short = short_commit(trigger)?;
                let prefix = slug(head, MAX_TAG_LEN - SHORT_COMMIT_LEN - "pr--".len())?;
                VersionTag::new(format!("pr-{}-{}", prefix, short), vec![])
            }
            TriggerKind::Manual => {
                let stripped = strip_ref(&trigger.ref_name);
                let branch = if stripped.is_empty() {
                    self.default_branch.as_str()
                } else {
                    stripped
                };
                let short = short_commit(trigger)?;
                let prefix = slug(branch, MAX_TAG_LEN - SHORT_COMMIT_LEN - 1)?;
                let aliases = if branch == self.default_branch {
                    vec![LATEST_ALIAS.to_string()]
                } else {
                    vec![]
                };
                VersionTag::new(format!("{}-{}", prefix, short), aliases)
            }
        };

        debug!(trigger = %trigger, tags = %tag, "resolved version");
        Ok(tag)
    }
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self::new("main")
    }
}

/// Resolve with the `main` default branch
pub fn resolve(trigger: &Trigger) -> Result<VersionTag, StagegateError> {
    VersionResolver::default().resolve(trigger)
}

fn unrecognized(reason: String) -> StagegateError {
    StagegateError::UnrecognizedTrigger { reason }
}

fn strip_ref(name: &str) -> &str {
    name.strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/tags/"))
        .unwrap_or(name)
}

fn strip_pull_ref(name: &str) -> &str {
    match name.strip_prefix("refs/pull/") {
        Some(rest) => rest
            .strip_suffix("/merge")
            .or_else(|| rest.strip_suffix("/head"))
            .unwrap_or(rest),
        None => strip_ref(name),
    }
}

fn short_commit(trigger: &Trigger) -> Result<String, StagegateError> {
    let commit = trigger
        .commit
        .as_deref()
        .ok_or_else(|| unrecognized(format!("{} trigger without a commit", trigger.kind)))?;

    if !commit_re().is_match(commit) {
        return Err(unrecognized(format!(
            "commit '{}' is not 8-64 hexadecimal characters",
            commit
        )));
    }

    Ok(commit[..SHORT_COMMIT_LEN].to_ascii_lowercase())
}

/// Normalize a ref into a tag-safe slug of at most `max_len` characters
pub fn slug(name: &str, max_len: usize) -> Result<String, StagegateError> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let trimmed: String = out
        .trim_matches(|c| c == '-' || c == '.')
        .chars()
        .take(max_len)
        .collect();
    let trimmed = trimmed.trim_end_matches(|c| c == '-' || c == '.').to_string();

    if trimmed.is_empty() {
        return Err(unrecognized(format!("ref '{}' has no tag-safe characters", name)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn tag_set(tag: &VersionTag) -> BTreeSet<&str> {
        tag.tags().into_iter().collect()
    }

    #[test]
    fn test_tag_push() {
        let tag = resolve(&Trigger::tag_push("v1.2.3")).unwrap();
        assert_eq!(tag_set(&tag), BTreeSet::from(["v1.2.3", "latest"]));
        assert_eq!(tag.primary, "v1.2.3");
    }

    #[test]
    fn test_tag_push_strips_ref_prefix() {
        let tag = resolve(&Trigger::tag_push("refs/tags/v2.0.0-rc.1")).unwrap();
        assert_eq!(tag.primary, "v2.0.0-rc.1");
    }

    #[test]
    fn test_tag_push_requires_semver() {
        for bad in ["1.2.3", "v1.2", "release-1", "v01.2.3"] {
            let err = resolve(&Trigger::tag_push(bad)).unwrap_err();
            assert!(matches!(err, StagegateError::UnrecognizedTrigger { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_default_branch_push() {
        let tag = resolve(&Trigger::branch_push("main", "a1b2c3d4ef")).unwrap();
        assert_eq!(tag_set(&tag), BTreeSet::from(["main-a1b2c3d4", "latest"]));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let trigger = Trigger::branch_push("refs/heads/main", "A1B2C3D4EF");
        let first = resolve(&trigger).unwrap();
        let second = resolve(&trigger).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.primary, "main-a1b2c3d4");
    }

    #[test]
    fn test_other_branch_is_slugged() {
        let tag = resolve(&Trigger::branch_push("Feature/Drift_Check!!v2", "0123456789abcdef")).unwrap();
        assert_eq!(tag.primary, "feature-drift_check-v2-01234567");
        assert!(tag.contains("latest"));
    }

    #[test]
    fn test_custom_default_branch() {
        let resolver = VersionResolver::new("trunk");
        let tag = resolver
            .resolve(&Trigger::branch_push("trunk", "a1b2c3d4ef"))
            .unwrap();
        assert_eq!(tag.primary, "trunk-a1b2c3d4");
    }

    #[test]
    fn test_default_branch_is_slugged() {
        let resolver = VersionResolver::new("Release/2.x");
        let tag = resolver
            .resolve(&Trigger::branch_push("refs/heads/Release/2.x", "a1b2c3d4ef"))
            .unwrap();
        assert_eq!(tag.primary, "release-2.x-a1b2c3d4");

        let manual = resolver
            .resolve(&Trigger::new(TriggerKind::Manual, "", "a1b2c3d4ef"))
            .unwrap();
        assert_eq!(manual.primary, "release-2.x-a1b2c3d4");
        assert!(manual.contains("latest"));
    }

    #[test]
    fn test_branch_push_needs_valid_commit() {
        for commit in ["", "abc", "not-a-sha-at-all"] {
            let err = resolve(&Trigger::branch_push("main", commit)).unwrap_err();
            assert!(matches!(err, StagegateError::UnrecognizedTrigger { .. }));
        }
    }

    #[test]
    fn test_pull_request_has_no_latest() {
        let tag = resolve(&Trigger::pull_request("refs/pull/42/merge", "a1b2c3d4ef")).unwrap();
        assert_eq!(tag.primary, "pr-42-a1b2c3d4");
        assert!(tag.aliases.is_empty());
    }

    #[test]
    fn test_manual_run() {
        let on_default = resolve(&Trigger::manual("", "a1b2c3d4ef")).unwrap();
        assert_eq!(tag_set(&on_default), BTreeSet::from(["main-a1b2c3d4", "latest"]));

        let on_branch = resolve(&Trigger::manual("hotfix/x", "a1b2c3d4ef")).unwrap();
        assert_eq!(on_branch.tags(), vec!["hotfix-x-a1b2c3d4"]);
    }

    #[test]
    fn test_slug_limits_length() {
        let long = "x".repeat(300);
        let tag = resolve(&Trigger::branch_push(long, "a1b2c3d4ef")).unwrap();
        assert_eq!(tag.primary.len(), MAX_TAG_LEN);
    }

    #[test]
    fn test_slug_rejects_empty() {
        assert!(slug("///", 50).is_err());
        assert_eq!(slug("--a//b..", 50).unwrap(), "a-b");
    }
}
