// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! In-memory artifact store
//!
//! Writes take the lock exclusively and are rejected when the name already
//! exists; reads share the lock and hand out cheap clones.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::{artifact_relative_path, Artifact, ArtifactSummary};
use crate::errors::StagegateError;

/// Store of artifacts published during one run
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: RwLock<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a single artifact
    ///
    /// Fails with [`StagegateError::DuplicatePublish`] if the name was
    /// already published, even when the payload is identical.
    pub async fn publish(
        &self,
        name: &str,
        payload: impl Into<Vec<u8>>,
        producer: &str,
    ) -> Result<Artifact, StagegateError> {
        let mut entries = self.entries.write().await;

        if entries.contains_key(name) {
            return Err(StagegateError::DuplicatePublish {
                artifact: name.to_string(),
                producer: producer.to_string(),
            });
        }

        let artifact = Artifact::new(name.to_string(), payload.into(), producer.to_string());
        debug!(artifact = name, producer, checksum = artifact.checksum(), "published artifact");
        entries.insert(name.to_string(), artifact.clone());

        Ok(artifact)
    }

    /// Publish a batch of artifacts atomically
    ///
    /// Either every artifact is published or none is.
    pub async fn publish_all(
        &self,
        outputs: Vec<(String, Vec<u8>)>,
        producer: &str,
    ) -> Result<Vec<Artifact>, StagegateError> {
        let mut entries = self.entries.write().await;

        let mut batch_names = HashSet::new();
        for (name, _) in &outputs {
            if entries.contains_key(name) || !batch_names.insert(name.as_str()) {
                return Err(StagegateError::DuplicatePublish {
                    artifact: name.clone(),
                    producer: producer.to_string(),
                });
            }
        }

        let mut published = Vec::with_capacity(outputs.len());
        for (name, payload) in outputs {
            let artifact = Artifact::new(name.clone(), payload, producer.to_string());
            debug!(artifact = %name, producer, checksum = artifact.checksum(), "published artifact");
            entries.insert(name, artifact.clone());
            published.push(artifact);
        }

        Ok(published)
    }

    /// Fetch a published artifact
    pub async fn fetch(&self, name: &str) -> Result<Artifact, StagegateError> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StagegateError::ArtifactNotFound {
                artifact: name.to_string(),
            })
    }

    /// Content digest of a published artifact
    pub async fn checksum(&self, name: &str) -> Result<String, StagegateError> {
        self.fetch(name).await.map(|a| a.checksum().to_string())
    }

    /// Check a published artifact against a digest obtained elsewhere
    pub async fn verify(&self, name: &str, expected: &str) -> Result<bool, StagegateError> {
        Ok(self.checksum(name).await? == expected)
    }

    /// Whether an artifact has been published
    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Number of published artifacts
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing has been published yet
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Summaries of every published artifact, sorted by name
    pub async fn summaries(&self) -> Vec<ArtifactSummary> {
        let mut summaries: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(Artifact::summary)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Write every artifact below `dir`, mirroring artifact names as paths
    pub async fn export_to(&self, dir: &Path) -> Result<Vec<PathBuf>, StagegateError> {
        let artifacts: Vec<Artifact> = self.entries.read().await.values().cloned().collect();
        let mut written = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let relative = artifact_relative_path(artifact.name()).ok_or_else(|| {
                StagegateError::FileWriteError {
                    path: dir.join(artifact.name()),
                    error: "artifact name escapes the export directory".into(),
                }
            })?;
            let path = dir.join(relative);

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StagegateError::FileWriteError {
                        path: parent.to_path_buf(),
                        error: e.to_string(),
                    }
                })?;
            }

            tokio::fs::write(&path, artifact.payload()).await.map_err(|e| {
                StagegateError::FileWriteError {
                    path: path.clone(),
                    error: e.to_string(),
                }
            })?;
            written.push(path);
        }

        written.sort();
        Ok(written)
    }
}
