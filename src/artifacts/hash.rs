// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Content hashing for artifacts and pipeline definitions
//!
//! Uses BLAKE3 for artifact checksums and the pipeline fingerprint.

use blake3::Hasher;

use crate::errors::StagegateError;
use crate::pipeline::Pipeline;

/// Pipeline definition hasher
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a new content hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash a pipeline definition into a stable digest
    ///
    /// Stages are hashed in declaration order, and each stage's environment
    /// is hashed with sorted keys so map iteration order does not leak into
    /// the digest.
    pub fn hash_pipeline(&mut self, pipeline: &Pipeline) -> Result<String, StagegateError> {
        self.hasher.update(pipeline.name.as_bytes());
        self.hasher.update(pipeline.default_branch.as_bytes());

        let mut global_env: Vec<_> = pipeline.env.iter().collect();
        global_env.sort();
        for (k, v) in global_env {
            self.hasher.update(k.as_bytes());
            self.hasher.update(v.as_bytes());
        }

        for stage in &pipeline.stages {
            self.hasher.update(stage.name.as_bytes());

            let action_json = serde_json::to_string(&stage.action)?;
            self.hasher.update(action_json.as_bytes());

            for dep in &stage.depends_on {
                self.hasher.update(dep.as_bytes());
            }
            for name in stage.requires.iter().chain(&stage.produces) {
                self.hasher.update(name.as_bytes());
            }
            self.hasher.update(stage.gate.as_str().as_bytes());

            let mut env: Vec<_> = stage.env.iter().collect();
            env.sort();
            for (k, v) in env {
                self.hasher.update(k.as_bytes());
                self.hasher.update(v.as_bytes());
            }
        }

        Ok(self.hasher.finalize().to_hex().to_string())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the hex digest of a payload
pub fn checksum_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_bytes() {
        let hash1 = checksum_bytes(b"hello");
        let hash2 = checksum_bytes(b"hello");
        let hash3 = checksum_bytes(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_pipeline_digest_is_stable() {
        let yaml = r#"
name: "digest"
env:
  B: "2"
  A: "1"
stages:
  - name: "build"
    action:
      type: shell
      command: "make"
"#;
        let pipeline = Pipeline::from_yaml(yaml).unwrap();

        let first = ContentHasher::new().hash_pipeline(&pipeline).unwrap();
        let second = ContentHasher::new().hash_pipeline(&pipeline).unwrap();
        assert_eq!(first, second);
    }
}
