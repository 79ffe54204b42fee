// src/profile.rs

//! Profile generations
//!
//! A generation is an immutable numbered directory whose `bin/` holds
//! symlinks into store artifacts. The `current` symlink names the active
//! generation; `previous` names the one before it. Publishing builds the
//! new generation completely, then retargets the symlinks atomically
//! (create-beside + rename), so readers always see a complete profile.
//!
//! Generation numbers only ever grow; rollback swaps `current` and
//! `previous` without renumbering.

use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::state::StateEntry;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the per-generation manifest file
pub const MANIFEST_FILE: &str = "manifest";

/// Name of the per-generation log file (overlap warnings)
pub const LOG_FILE: &str = "log";

/// One entry of a generation: a declarative line plus every artifact key
/// (the entry's own build and its transitive dependencies) backing it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationEntry {
    pub entry: String,
    #[serde(default)]
    pub keys: Vec<Fingerprint>,
}

/// Manifest written into every generation directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub created: DateTime<Utc>,
    pub entries: Vec<GenerationEntry>,
}

impl GenerationManifest {
    /// The declarative snapshot as parsed entries; unparseable lines are
    /// dropped with a warning
    pub fn state_entries(&self) -> Vec<StateEntry> {
        self.entries
            .iter()
            .filter_map(|e| match e.entry.parse() {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    warn!("ignoring manifest entry '{}': {reason}", e.entry);
                    None
                }
            })
            .collect()
    }

    /// Every artifact key referenced by this generation, deduplicated
    pub fn all_keys(&self) -> Vec<Fingerprint> {
        let mut keys: Vec<Fingerprint> = self
            .entries
            .iter()
            .flat_map(|e| e.keys.iter().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// The profile directory and its generations
#[derive(Debug, Clone)]
pub struct Profile {
    dir: PathBuf,
}

impl Profile {
    pub fn new(profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: profiles_dir.into(),
        }
    }

    fn generation_dir(&self, number: u64) -> PathBuf {
        self.dir.join(format!("gen-{number}"))
    }

    fn current_link(&self) -> PathBuf {
        self.dir.join("current")
    }

    fn previous_link(&self) -> PathBuf {
        self.dir.join("previous")
    }

    /// The bin directory exposed on the user's PATH
    pub fn current_bin(&self) -> PathBuf {
        self.current_link().join("bin")
    }

    /// Number of the generation a symlink points at
    fn link_target(&self, link: &Path) -> Option<u64> {
        let target = fs::read_link(link).ok()?;
        let name = target.file_name()?.to_str()?;
        name.strip_prefix("gen-")?.parse().ok()
    }

    /// The active generation number, if any
    pub fn current(&self) -> Option<u64> {
        self.link_target(&self.current_link())
    }

    /// The previous generation number, if any
    pub fn previous(&self) -> Option<u64> {
        self.link_target(&self.previous_link())
    }

    /// All generation numbers on disk, ascending
    pub fn list(&self) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        if !self.dir.exists() {
            return Ok(numbers);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("gen-"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Read a generation's manifest
    pub fn manifest(&self, number: u64) -> Result<GenerationManifest> {
        let path = self.generation_dir(number).join(MANIFEST_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("cannot read generation {number} manifest: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Store(format!("corrupt generation {number} manifest: {e}")))
    }

    /// Manifest of the active generation, if one exists
    pub fn current_manifest(&self) -> Result<Option<GenerationManifest>> {
        match self.current() {
            Some(n) => Ok(Some(self.manifest(n)?)),
            None => Ok(None),
        }
    }

    /// Publish a new generation composed of the given entries
    ///
    /// Allocates the next number, populates `bin/` with symlinks to each
    /// artifact's executables (an executable offered twice keeps the last
    /// one and records an overlap warning in the generation log), writes the
    /// manifest, then retargets `current` and `previous`. Callers hold the
    /// root lock across this.
    pub fn publish(&self, store: &Store, entries: &[GenerationEntry]) -> Result<u64> {
        let number = self.list()?.last().copied().unwrap_or(0) + 1;
        let gen_dir = self.generation_dir(number);
        let bin_dir = gen_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;

        let mut log_lines = Vec::new();
        let mut keys_in_order: Vec<Fingerprint> = Vec::new();
        for entry in entries {
            for key in &entry.keys {
                if !keys_in_order.contains(key) {
                    keys_in_order.push(key.clone());
                }
            }
        }

        for key in &keys_in_order {
            let Some(artifact_bin) = store.bin_dir(key) else {
                debug!("artifact {} offers no executables", key.short());
                continue;
            };
            for exe in fs::read_dir(&artifact_bin)? {
                let exe = exe?;
                let name = exe.file_name();
                let link = bin_dir.join(&name);
                if link.symlink_metadata().is_ok() {
                    let line = format!(
                        "overlap: {} replaced by {} for '{}'",
                        self.link_owner(&link).unwrap_or_else(|| "?".into()),
                        key.short(),
                        name.to_string_lossy()
                    );
                    warn!("{line}");
                    log_lines.push(line);
                    fs::remove_file(&link)?;
                }
                symlink(exe.path(), &link)?;
            }
        }

        if !log_lines.is_empty() {
            fs::write(gen_dir.join(LOG_FILE), log_lines.join("\n") + "\n")?;
        }

        let manifest = GenerationManifest {
            created: Utc::now(),
            entries: entries.to_vec(),
        };
        fs::write(
            gen_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)
                .map_err(|e| Error::Store(format!("cannot serialize manifest: {e}")))?,
        )?;

        let old_current = self.current();
        retarget(&self.current_link(), &PathBuf::from(format!("gen-{number}")))?;
        if let Some(old) = old_current {
            retarget(&self.previous_link(), &PathBuf::from(format!("gen-{old}")))?;
        }

        info!("published generation {number}");
        Ok(number)
    }

    /// Identify which artifact a profile symlink currently points into
    fn link_owner(&self, link: &Path) -> Option<String> {
        let target = fs::read_link(link).ok()?;
        let mut components = target.components();
        components
            .find_map(|c| {
                let text = c.as_os_str().to_str()?;
                Fingerprint::parse(text)
            })
            .map(|k| k.short().to_string())
    }

    /// Swap `current` and `previous` atomically
    pub fn rollback(&self) -> Result<u64> {
        let current = self.current().ok_or(Error::NoPreviousGeneration)?;
        let previous = self.previous().ok_or(Error::NoPreviousGeneration)?;

        retarget(&self.current_link(), &PathBuf::from(format!("gen-{previous}")))?;
        retarget(&self.previous_link(), &PathBuf::from(format!("gen-{current}")))?;

        info!("rolled back to generation {previous}");
        Ok(previous)
    }
}

/// Retarget a symlink atomically: create beside, then rename over
fn retarget(link: &Path, target: &Path) -> Result<()> {
    let staging = link.with_extension(format!("tmp-{}", std::process::id()));
    let _ = fs::remove_file(&staging);
    symlink(target, &staging)?;
    fs::rename(&staging, link)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_hex;
    use tempfile::TempDir;

    /// Drop a fake artifact with the given executables straight into the
    /// store directory
    fn fake_artifact(store_dir: &Path, seed: &str, exes: &[&str]) -> Fingerprint {
        let key = Fingerprint::parse(&sha256_hex(seed.as_bytes())).unwrap();
        let bin = store_dir.join(key.as_str()).join("bin");
        fs::create_dir_all(&bin).unwrap();
        for exe in exes {
            fs::write(bin.join(exe), format!("#!/bin/sh\necho {seed}\n")).unwrap();
        }
        key
    }

    fn setup() -> (TempDir, Store, Profile) {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let profiles_dir = tmp.path().join("profiles");
        fs::create_dir_all(&store_dir).unwrap();
        fs::create_dir_all(&profiles_dir).unwrap();
        (
            tmp,
            Store::new(store_dir),
            Profile::new(profiles_dir),
        )
    }

    fn entry_for(key: &Fingerprint, line: &str) -> GenerationEntry {
        GenerationEntry {
            entry: line.to_string(),
            keys: vec![key.clone()],
        }
    }

    #[test]
    fn test_publish_first_generation() {
        let (tmp, store, profile) = setup();
        let key = fake_artifact(&tmp.path().join("store"), "cowsay", &["cowsay"]);

        let n = profile
            .publish(&store, &[entry_for(&key, "recipe:cowsay@3.04")])
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(profile.current(), Some(1));
        assert_eq!(profile.previous(), None);
        assert!(profile.current_bin().join("cowsay").exists());

        let manifest = profile.manifest(1).unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.all_keys(), vec![key]);
    }

    #[test]
    fn test_publish_advances_current_and_previous() {
        let (tmp, store, profile) = setup();
        let cowsay = fake_artifact(&tmp.path().join("store"), "cowsay", &["cowsay"]);
        let hello = fake_artifact(&tmp.path().join("store"), "hello", &["hello"]);

        profile
            .publish(&store, &[entry_for(&cowsay, "recipe:cowsay@3.04")])
            .unwrap();
        profile
            .publish(
                &store,
                &[
                    entry_for(&cowsay, "recipe:cowsay@3.04"),
                    entry_for(&hello, "recipe:hello@2.12"),
                ],
            )
            .unwrap();

        assert_eq!(profile.current(), Some(2));
        assert_eq!(profile.previous(), Some(1));
        assert!(profile.current_bin().join("hello").exists());
        assert!(profile.current_bin().join("cowsay").exists());

        // generation 1 is untouched
        assert!(!profile.dir.join("gen-1/bin/hello").exists());
    }

    #[test]
    fn test_generation_numbers_strictly_increase() {
        let (tmp, store, profile) = setup();
        let key = fake_artifact(&tmp.path().join("store"), "x", &["x"]);

        for expected in 1..=4 {
            let n = profile
                .publish(&store, &[entry_for(&key, "recipe:x@1.0")])
                .unwrap();
            assert_eq!(n, expected);
        }
        assert_eq!(profile.list().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rollback_swaps_current_and_previous() {
        let (tmp, store, profile) = setup();
        let cowsay = fake_artifact(&tmp.path().join("store"), "cowsay", &["cowsay"]);
        let hello = fake_artifact(&tmp.path().join("store"), "hello", &["hello"]);

        profile
            .publish(&store, &[entry_for(&cowsay, "recipe:cowsay@3.04")])
            .unwrap();
        profile
            .publish(&store, &[entry_for(&hello, "recipe:hello@2.12")])
            .unwrap();

        let restored = profile.rollback().unwrap();
        assert_eq!(restored, 1);
        assert_eq!(profile.current(), Some(1));
        assert_eq!(profile.previous(), Some(2));
        assert!(profile.current_bin().join("cowsay").exists());
        assert!(!profile.current_bin().join("hello").exists());

        // rolling forward again is also just a swap
        profile.rollback().unwrap();
        assert_eq!(profile.current(), Some(2));
    }

    #[test]
    fn test_rollback_without_previous_fails() {
        let (tmp, store, profile) = setup();
        assert!(matches!(
            profile.rollback(),
            Err(Error::NoPreviousGeneration)
        ));

        let key = fake_artifact(&tmp.path().join("store"), "only", &["only"]);
        profile
            .publish(&store, &[entry_for(&key, "recipe:only@1.0")])
            .unwrap();
        assert!(matches!(
            profile.rollback(),
            Err(Error::NoPreviousGeneration)
        ));
    }

    #[test]
    fn test_overlap_last_wins_and_logged() {
        let (tmp, store, profile) = setup();
        let first = fake_artifact(&tmp.path().join("store"), "first", &["tool"]);
        let second = fake_artifact(&tmp.path().join("store"), "second", &["tool"]);

        let n = profile
            .publish(
                &store,
                &[
                    entry_for(&first, "recipe:first@1.0"),
                    entry_for(&second, "recipe:second@1.0"),
                ],
            )
            .unwrap();

        let link = fs::read_link(profile.current_bin().join("tool")).unwrap();
        assert!(link.to_string_lossy().contains(second.as_str()));

        let log = fs::read_to_string(profile.dir.join(format!("gen-{n}")).join(LOG_FILE)).unwrap();
        assert!(log.contains("overlap"));
        assert!(log.contains("tool"));
    }

    #[test]
    fn test_manifest_state_entries() {
        let (tmp, store, profile) = setup();
        let key = fake_artifact(&tmp.path().join("store"), "hello", &["hello"]);
        profile
            .publish(&store, &[entry_for(&key, "recipe:hello@2.12")])
            .unwrap();

        let manifest = profile.current_manifest().unwrap().unwrap();
        let entries = manifest.state_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name(), "hello");
    }

    #[test]
    fn test_publish_empty_generation() {
        let (_tmp, store, profile) = setup();
        let n = profile.publish(&store, &[]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(profile.current(), Some(1));
        assert!(profile.manifest(1).unwrap().entries.is_empty());
    }
}
