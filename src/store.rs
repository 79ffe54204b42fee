// src/store.rs

//! Content-addressed artifact store
//!
//! Every built artifact lives at `<store>/<build-fingerprint>/`, immutable
//! after insertion. Insertion is an atomic rename from a staging directory
//! on the same filesystem; a pre-existing destination means another worker
//! produced identical content, which is success by definition.
//!
//! Each artifact carries a `manifest` file recording the fingerprint
//! inputs, so the store key can be recomputed and verified.

use crate::error::{Error, Result};
use crate::hash::{build_fingerprint, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the per-artifact manifest file
pub const MANIFEST_FILE: &str = "manifest";

/// Metadata recorded inside every installed artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactManifest {
    /// Package name
    pub name: String,
    /// Package version (or the pinned ref for ad-hoc remote builds)
    pub version: String,
    /// Store keys of direct dependencies
    pub dependencies: Vec<Fingerprint>,
    /// Ref the source was fetched at
    pub reference: Option<String>,
    /// Commit the ref resolved to
    pub commit: String,
    /// Tree fingerprint of the source
    pub tree: Fingerprint,
    /// Digest of the canonical recipe text or detected build descriptor
    pub build_digest: String,
    /// Prefix template used during the build
    pub prefix_template: String,
    /// Sandbox policy marker used during the build
    pub sandbox_marker: String,
    /// Build completion time
    pub built_at: DateTime<Utc>,
}

impl ArtifactManifest {
    /// Recompute the store key from the recorded inputs
    pub fn recompute_key(&self) -> Fingerprint {
        build_fingerprint(
            &self.tree,
            &self.build_digest,
            &self.dependencies,
            &self.prefix_template,
            &self.sandbox_marker,
        )
    }
}

/// The content-addressed store
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an artifact with this key lives at
    pub fn artifact_path(&self, key: &Fingerprint) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Whether an artifact with this key is present
    pub fn has(&self, key: &Fingerprint) -> bool {
        self.artifact_path(key).is_dir()
    }

    /// Move a staged tree into the store at `key`
    ///
    /// Atomic rename; if the destination already exists the staged copy is
    /// discarded and the call succeeds (content-addressed: identical key
    /// means identical content).
    pub fn insert(&self, staging_dir: &Path, key: &Fingerprint) -> Result<PathBuf> {
        let dest = self.artifact_path(key);
        if dest.exists() {
            debug!("store already has {}, discarding staged copy", key.short());
            let _ = fs::remove_dir_all(staging_dir);
            return Ok(dest);
        }

        match fs::rename(staging_dir, &dest) {
            Ok(()) => {
                info!("stored artifact {}", key.short());
                Ok(dest)
            }
            Err(_) if dest.exists() => {
                // lost the race to another worker; same content either way
                let _ = fs::remove_dir_all(staging_dir);
                Ok(dest)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parse and return an artifact's manifest
    pub fn artifact_manifest(&self, key: &Fingerprint) -> Result<ArtifactManifest> {
        let path = self.artifact_path(key).join(MANIFEST_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("cannot read manifest for {}: {e}", key.short())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Store(format!("corrupt manifest for {}: {e}", key.short())))
    }

    /// Verify that an artifact's recorded inputs reproduce its key
    pub fn verify(&self, key: &Fingerprint) -> Result<bool> {
        let manifest = self.artifact_manifest(key)?;
        Ok(&manifest.recompute_key() == key)
    }

    /// All artifact keys, sorted; entries that are not well-formed keys are
    /// ignored
    pub fn enumerate(&self) -> Result<Vec<Fingerprint>> {
        let mut keys = Vec::new();
        if !self.root.exists() {
            return Ok(keys);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(Fingerprint::parse)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// The executables directory of an artifact, if it has one
    pub fn bin_dir(&self, key: &Fingerprint) -> Option<PathBuf> {
        let bin = self.artifact_path(key).join("bin");
        bin.is_dir().then_some(bin)
    }
}
