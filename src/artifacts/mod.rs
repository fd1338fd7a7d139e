// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Run-scoped artifact storage
//!
//! Artifacts are the only channel through which stages hand data to each
//! other. Each run owns a fresh [`ArtifactStore`]; nothing is shared between
//! runs.

mod hash;
mod store;

pub use hash::{checksum_bytes, ContentHasher};
pub use store::ArtifactStore;

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// An immutable, published artifact
///
/// Cloning is cheap: the payload is shared, so stages only ever hold
/// read-only handles onto bytes owned by the store.
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    payload: Arc<[u8]>,
    producer: String,
    created_at: SystemTime,
    checksum: String,
}

impl Artifact {
    pub(crate) fn new(name: String, payload: Vec<u8>, producer: String) -> Self {
        let checksum = checksum_bytes(&payload);
        Self {
            name,
            payload: payload.into(),
            producer,
            created_at: SystemTime::now(),
            checksum,
        }
    }

    /// Artifact name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload decoded as UTF-8, if it is text
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Stage that published this artifact
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// When the artifact was published
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// BLAKE3 hex digest of the payload
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Serializable summary without the payload
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            name: self.name.clone(),
            producer: self.producer.clone(),
            size_bytes: self.payload.len() as u64,
            checksum: self.checksum.clone(),
            created_at: self.created_at,
        }
    }
}

/// Artifact metadata as recorded in a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub producer: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub created_at: SystemTime,
}

/// Map an artifact name onto a relative path below some root directory
///
/// Names may contain `/` to mirror a file layout (`data/processed/features.csv`)
/// but must stay inside the root: absolute names and `..` are rejected.
pub fn artifact_relative_path(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_metadata() {
        let artifact = Artifact::new("features.csv".into(), b"a,b\n1,2\n".to_vec(), "data".into());

        assert_eq!(artifact.name(), "features.csv");
        assert_eq!(artifact.producer(), "data");
        assert_eq!(artifact.size(), 8);
        assert_eq!(artifact.checksum(), checksum_bytes(b"a,b\n1,2\n"));
        assert_eq!(artifact.as_str(), Some("a,b\n1,2\n"));
    }

    #[test]
    fn test_relative_path_accepts_nested_names() {
        assert_eq!(
            artifact_relative_path("data/processed/features.csv"),
            Some(PathBuf::from("data/processed/features.csv"))
        );
        assert_eq!(artifact_relative_path("./model.pkl"), Some(PathBuf::from("model.pkl")));
    }

    #[test]
    fn test_relative_path_rejects_escapes() {
        assert_eq!(artifact_relative_path("../secrets"), None);
        assert_eq!(artifact_relative_path("/etc/passwd"), None);
        assert_eq!(artifact_relative_path(""), None);
        assert_eq!(artifact_relative_path("."), None);
    }
}
