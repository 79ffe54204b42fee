// src/builder.rs

//! Build orchestration for one pinned package
//!
//! The builder drives fetch → detect → fingerprint → build → install for a
//! single package: it materializes the source, determines the command
//! sequence (recipe commands, or the detector when the recipe supplies
//! none), computes the store key, takes the store and binary-cache fast
//! paths when possible, and otherwise runs the commands in a staging
//! directory whose `prefix/` is finally renamed into the store.
//!
//! Failure leaves the store unchanged; the staging directory is removed on
//! every exit path (it is a `TempDir`). Repeated calls with identical
//! inputs are no-ops after the fast-path check.

use crate::cache::{BinaryCacheClient, CacheLookup};
use crate::detect::BuildSystem;
use crate::error::{Error, Result};
use crate::fetch::{copy_tree, source_url, SourceFetcher};
use crate::hash::{build_fingerprint, sha256_hex, Fingerprint};
use crate::recipe::{Recipe, PREFIX_PLACEHOLDER};
use crate::sandbox::SandboxRunner;
use crate::store::{ArtifactManifest, Store, MANIFEST_FILE};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// What to build: a catalog recipe or an ad-hoc remote repository
#[derive(Debug, Clone)]
pub enum BuildInput {
    Recipe(Recipe),
    Remote {
        owner_repo: String,
        reference: Option<String>,
    },
}

/// A completed (or reused) build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub name: String,
    pub version: String,
    pub key: Fingerprint,
    pub path: PathBuf,
    /// True when the artifact was already in the store
    pub reused: bool,
    /// True when the artifact came from the binary cache
    pub from_cache: bool,
}

/// Builder over one root's store, fetcher and sandbox
pub struct Builder<'a> {
    staging_root: PathBuf,
    store: &'a Store,
    fetcher: &'a SourceFetcher,
    runner: &'a SandboxRunner,
    cache: Option<&'a BinaryCacheClient>,
}

impl<'a> Builder<'a> {
    pub fn new(
        staging_root: impl Into<PathBuf>,
        store: &'a Store,
        fetcher: &'a SourceFetcher,
        runner: &'a SandboxRunner,
        cache: Option<&'a BinaryCacheClient>,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            store,
            fetcher,
            runner,
            cache,
        }
    }

    /// Build one package whose dependencies are already in the store
    pub fn build(&self, input: &BuildInput, dependencies: &[BuildOutcome]) -> Result<BuildOutcome> {
        let (url, reference) = match input {
            BuildInput::Recipe(recipe) => (
                source_url(&recipe.source.repo),
                recipe.source.reference.clone(),
            ),
            BuildInput::Remote {
                owner_repo,
                reference,
            } => (source_url(owner_repo), reference.clone()),
        };

        let checkout = self.fetcher.fetch(&url, reference.as_deref())?;

        // Recipe commands take priority; the detector only runs when the
        // recipe supplies none (or there is no recipe at all).
        let (build_text, commands) = match input {
            BuildInput::Recipe(recipe)
                if !recipe.build.commands.is_empty() || !recipe.install.commands.is_empty() =>
            {
                let mut commands = recipe.build.commands.clone();
                commands.extend(recipe.install.commands.iter().cloned());
                (recipe.canonical_text(), commands)
            }
            _ => {
                let system = BuildSystem::detect(&checkout.path)?;
                (system.descriptor(), system.commands())
            }
        };

        let dep_keys: Vec<Fingerprint> = dependencies.iter().map(|d| d.key.clone()).collect();
        let build_digest = sha256_hex(build_text.as_bytes());
        let key = build_fingerprint(
            &checkout.tree,
            &build_digest,
            &dep_keys,
            PREFIX_PLACEHOLDER,
            self.runner.policy().marker(),
        );

        let (name, version) = match input {
            BuildInput::Recipe(recipe) => (recipe.name.clone(), recipe.version.clone()),
            BuildInput::Remote {
                owner_repo,
                reference,
            } => (
                owner_repo.clone(),
                reference.clone().unwrap_or_else(|| checkout.commit.clone()),
            ),
        };

        // Fast path 1: already in the store.
        if self.store.has(&key) {
            info!("{name} {version} already in store ({})", key.short());
            return Ok(BuildOutcome {
                name,
                version,
                key: key.clone(),
                path: self.store.artifact_path(&key),
                reused: true,
                from_cache: false,
            });
        }

        // Fast path 2: binary cache.
        if let Some(client) = self.cache {
            match self.try_cache(client, &key) {
                Ok(true) => {
                    return Ok(BuildOutcome {
                        name,
                        version,
                        key: key.clone(),
                        path: self.store.artifact_path(&key),
                        reused: false,
                        from_cache: true,
                    });
                }
                Ok(false) => {}
                Err(e) => warn!("binary cache unusable for {}: {e}; building locally", key.short()),
            }
        }

        info!("building {name} {version} ({})", key.short());
        let staging = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&self.staging_root)?;

        let source_dir = staging.path().join("src");
        copy_tree(&checkout.path, &source_dir)?;
        let prefix = staging.path().join("prefix");
        fs::create_dir(&prefix)?;

        let env = build_environment(dependencies);
        let writable = vec![staging.path().to_path_buf()];
        for command in &commands {
            let expanded = command.replace(PREFIX_PLACEHOLDER, &prefix.to_string_lossy());
            self.runner.run(&expanded, &source_dir, &env, &writable)?;
        }

        let manifest = ArtifactManifest {
            name: name.clone(),
            version: version.clone(),
            dependencies: dep_keys,
            reference,
            commit: checkout.commit,
            tree: checkout.tree,
            build_digest,
            prefix_template: PREFIX_PLACEHOLDER.to_string(),
            sandbox_marker: self.runner.policy().marker().to_string(),
            built_at: Utc::now(),
        };
        fs::write(
            prefix.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)
                .map_err(|e| Error::Store(format!("cannot serialize manifest: {e}")))?,
        )?;

        let path = self.store.insert(&prefix, &key)?;
        // the TempDir removes the rest of the staging area on drop
        Ok(BuildOutcome {
            name,
            version,
            key,
            path,
            reused: false,
            from_cache: false,
        })
    }

    /// Attempt the binary-cache fast path; Ok(false) is a clean miss
    fn try_cache(&self, client: &BinaryCacheClient, key: &Fingerprint) -> Result<bool> {
        match client.lookup(key)? {
            CacheLookup::Miss => Ok(false),
            CacheLookup::Hit => {
                let staging = tempfile::Builder::new()
                    .prefix("cache-")
                    .tempdir_in(&self.staging_root)?;
                let artifact = client.fetch_into(key, staging.path())?;
                self.store.insert(&artifact, key)?;
                Ok(true)
            }
        }
    }
}

/// Environment for build commands: dependency artifacts exposed on the
/// search paths the common toolchains consult
fn build_environment(dependencies: &[BuildOutcome]) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    let mut bin_paths = Vec::new();
    let mut include_paths = Vec::new();
    let mut lib_paths = Vec::new();
    for dep in dependencies {
        let bin = dep.path.join("bin");
        if bin.is_dir() {
            bin_paths.push(bin.to_string_lossy().into_owned());
        }
        let include = dep.path.join("include");
        if include.is_dir() {
            include_paths.push(include.to_string_lossy().into_owned());
        }
        let lib = dep.path.join("lib");
        if lib.is_dir() {
            lib_paths.push(lib.to_string_lossy().into_owned());
        }
    }

    if !bin_paths.is_empty() {
        let tail = env.get("PATH").cloned().unwrap_or_default();
        env.insert("PATH".into(), format!("{}:{tail}", bin_paths.join(":")));
    }
    if !include_paths.is_empty() {
        env.insert("CPATH".into(), include_paths.join(":"));
    }
    if !lib_paths.is_empty() {
        let joined = lib_paths.join(":");
        env.insert("LIBRARY_PATH".into(), joined.clone());
        env.insert("LD_LIBRARY_PATH".into(), joined);
    }
    env
}
