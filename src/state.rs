// src/state.rs

//! Declarative package state
//!
//! The state file (`config/packages.conf`) lists exactly the packages the
//! user asked for, one entry per line:
//!
//! ```text
//! # managed by pygr
//! system:apt:curl
//! remote-repo:BurntSushi/ripgrep@v13.0.0
//! recipe:hello@2.12
//! ```
//!
//! Comments start with `#`. Duplicate entries are forbidden; reading keeps
//! the last occurrence and warns. Transitive dependencies never appear
//! here; they are derivable from the current generation's manifest.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// One line of declarative state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateEntry {
    /// A package delegated to the system package manager
    System { pm: String, name: String },
    /// An ad-hoc build of a remote repository at an optional ref
    RemoteRepo {
        owner_repo: String,
        reference: Option<String>,
    },
    /// A recipe build pinned to a version
    Recipe { name: String, version: String },
}

impl StateEntry {
    /// Logical identity used for duplicate detection and uninstall matching
    pub fn key(&self) -> String {
        match self {
            StateEntry::System { pm, name } => format!("system:{pm}:{name}"),
            StateEntry::RemoteRepo { owner_repo, .. } => format!("remote-repo:{owner_repo}"),
            StateEntry::Recipe { name, .. } => format!("recipe:{name}"),
        }
    }

    /// The short name a user refers to this entry by
    pub fn display_name(&self) -> &str {
        match self {
            StateEntry::System { name, .. } => name,
            StateEntry::RemoteRepo { owner_repo, .. } => owner_repo,
            StateEntry::Recipe { name, .. } => name,
        }
    }

    /// Whether a user-supplied token refers to this entry
    ///
    /// Recipe and system entries match by package name; remote entries
    /// match the full `owner/repo` or the bare repo name.
    pub fn matches(&self, token: &str) -> bool {
        match self {
            StateEntry::System { name, .. } => name == token,
            StateEntry::Recipe { name, .. } => name == token,
            StateEntry::RemoteRepo { owner_repo, .. } => {
                owner_repo == token
                    || owner_repo
                        .rsplit('/')
                        .next()
                        .map(|repo| repo == token)
                        .unwrap_or(false)
            }
        }
    }
}

impl fmt::Display for StateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateEntry::System { pm, name } => write!(f, "system:{pm}:{name}"),
            StateEntry::RemoteRepo {
                owner_repo,
                reference,
            } => match reference {
                Some(r) => write!(f, "remote-repo:{owner_repo}@{r}"),
                None => write!(f, "remote-repo:{owner_repo}"),
            },
            StateEntry::Recipe { name, version } => write!(f, "recipe:{name}@{version}"),
        }
    }
}

impl FromStr for StateEntry {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("system:") {
            let (pm, name) = rest
                .split_once(':')
                .ok_or_else(|| format!("expected system:PM:NAME, got '{s}'"))?;
            if pm.trim().is_empty() || name.trim().is_empty() {
                return Err(format!("empty field in '{s}'"));
            }
            Ok(StateEntry::System {
                pm: pm.trim().to_string(),
                name: name.trim().to_string(),
            })
        } else if let Some(rest) = s.strip_prefix("remote-repo:") {
            let (repo, reference) = match rest.split_once('@') {
                Some((repo, r)) => (repo.trim(), Some(r.trim().to_string())),
                None => (rest.trim(), None),
            };
            if !repo.contains('/') {
                return Err(format!("expected OWNER/REPO in '{s}'"));
            }
            Ok(StateEntry::RemoteRepo {
                owner_repo: repo.to_string(),
                reference,
            })
        } else if let Some(rest) = s.strip_prefix("recipe:") {
            let (name, version) = rest
                .split_once('@')
                .ok_or_else(|| format!("expected recipe:NAME@VERSION, got '{s}'"))?;
            if name.trim().is_empty() || version.trim().is_empty() {
                return Err(format!("empty field in '{s}'"));
            }
            Ok(StateEntry::Recipe {
                name: name.trim().to_string(),
                version: version.trim().to_string(),
            })
        } else {
            Err(format!("unknown entry kind in '{s}'"))
        }
    }
}

/// Read the state file; a missing file is an empty state
///
/// Duplicates (same logical key) keep the last occurrence, at its position,
/// with a warning.
pub fn read(path: &Path) -> Result<Vec<StateEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;

    let mut entries: Vec<StateEntry> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = StateEntry::from_str(line).map_err(|reason| Error::StateMalformed {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        })?;

        if let Some(pos) = entries.iter().position(|e| e.key() == entry.key()) {
            warn!(
                "duplicate state entry '{}' at {}:{}; keeping the last occurrence",
                entry.key(),
                path.display(),
                index + 1
            );
            entries.remove(pos);
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Atomically rewrite the state file (temp file, fsync, rename)
pub fn write(path: &Path, entries: &[StateEntry]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| Error::Layout {
        path: path.to_path_buf(),
        reason: "state file has no parent directory".into(),
    })?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    writeln!(temp, "# managed by pygr; one package per line")?;
    for entry in entries {
        writeln!(temp, "{entry}")?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Rewrite state from a generation's entry snapshot, preserving `system:`
/// entries the snapshot does not carry
///
/// System packages live outside the store, so a manifest built before a
/// system entry existed must not erase it.
pub fn sync_entries(current: &[StateEntry], snapshot: &[StateEntry]) -> Vec<StateEntry> {
    let mut merged: Vec<StateEntry> = snapshot.to_vec();
    for entry in current {
        if matches!(entry, StateEntry::System { .. })
            && !merged.iter().any(|e| e.key() == entry.key())
        {
            merged.push(entry.clone());
        }
    }
    merged
}
