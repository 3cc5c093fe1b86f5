// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Speech artifact cache: flat directory of files named by fingerprint.
//!
//! The fingerprint covers every parameter that alters synthesis output;
//! leaving one out would replay another voice's audio. Generated audio is
//! staged to a temp file in the cache directory and renamed into place, so
//! a concurrent reader never sees a partial artifact.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use sha2::{Digest, Sha256};

/// Full synthesis parameter tuple for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactKey {
    pub text: String,
    pub voice: String,
    pub style: String,
    pub speed: f32,
    pub model: String,
    pub provider: String,
}

impl ArtifactKey {
    /// Stable hex fingerprint of the key tuple. Fields are length-prefixed
    /// so `("ab","c")` and `("a","bc")` cannot collide; speed hashes by bit
    /// pattern to avoid float-formatting drift.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in
            [&self.text, &self.voice, &self.style, &self.model, &self.provider]
        {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.speed.to_bits().to_le_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[derive(Debug, Clone)]
struct ArtifactMeta {
    path: PathBuf,
    #[allow(dead_code)]
    generated_at: Instant,
}

/// On-disk artifact store with an in-memory index of known entries.
pub struct ArtifactCache {
    dir: PathBuf,
    entries: parking_lot::Mutex<HashMap<String, ArtifactMeta>>,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        Ok(Self { dir, entries: parking_lot::Mutex::new(HashMap::new()) })
    }

    /// Path an artifact with this fingerprint lives at (whether or not it
    /// exists yet).
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(fingerprint)
    }

    /// Look up a cached artifact, consulting the index first and falling
    /// back to the filesystem (warm starts across broker restarts).
    pub fn lookup(&self, fingerprint: &str) -> Option<PathBuf> {
        if let Some(meta) = self.entries.lock().get(fingerprint) {
            return Some(meta.path.clone());
        }
        let path = self.path_for(fingerprint);
        if path.is_file() {
            self.entries.lock().insert(
                fingerprint.to_owned(),
                ArtifactMeta { path: path.clone(), generated_at: Instant::now() },
            );
            Some(path)
        } else {
            None
        }
    }

    /// Create a staging file inside the cache directory so the final rename
    /// stays on one filesystem.
    pub fn stage(&self) -> anyhow::Result<tempfile::NamedTempFile> {
        tempfile::NamedTempFile::new_in(&self.dir).context("create staging file")
    }

    /// Atomically move a staged file into its cache slot.
    pub fn commit(&self, staged: tempfile::NamedTempFile, fingerprint: &str) -> anyhow::Result<PathBuf> {
        let path = self.path_for(fingerprint);
        staged
            .persist(&path)
            .with_context(|| format!("persist artifact {}", path.display()))?;
        self.entries.lock().insert(
            fingerprint.to_owned(),
            ArtifactMeta { path: path.clone(), generated_at: Instant::now() },
        );
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
