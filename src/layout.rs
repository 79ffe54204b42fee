// src/layout.rs

//! Filesystem layout under the pygr root
//!
//! Everything pygr owns lives under one root directory:
//!
//! ```text
//! <root>/
//!   store/              content-addressed artifacts
//!   profiles/           gen-N directories + current/previous symlinks
//!   repos/              recipe repository clones
//!   sources/            source checkouts
//!   config/packages.conf  declarative state
//!   backups/            timestamped snapshots
//!   pygr.db             metadata database
//!   .lock               advisory root lock
//! ```
//!
//! The root defaults to the per-user data directory and can be overridden by
//! `-c DIR` or `PYGR_ROOT`. Directories are created on first use with
//! owner-only permissions.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding the root directory
pub const ROOT_ENV: &str = "PYGR_ROOT";

/// Name of the declarative state file under `config/`
pub const STATE_FILE: &str = "packages.conf";

/// Resolved locations for a pygr installation
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Resolve the root: CLI override, then `PYGR_ROOT`, then the per-user
    /// data directory
    pub fn discover(cli_root: Option<&Path>) -> Result<Self> {
        let root = if let Some(dir) = cli_root {
            dir.to_path_buf()
        } else if let Ok(env_root) = std::env::var(ROOT_ENV) {
            PathBuf::from(env_root)
        } else {
            let data = dirs::data_local_dir().ok_or_else(|| Error::Layout {
                path: PathBuf::from("~"),
                reason: "cannot determine the user data directory".into(),
            })?;
            data.join("pygr")
        };
        Ok(Self { root })
    }

    /// Use an explicit root without discovery (tests, fixtures)
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("sources")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Scratch space for build staging; same filesystem as the store so the
    /// final rename into the store is atomic
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("pygr.db")
    }

    pub fn state_file(&self) -> PathBuf {
        self.config_dir().join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Create any missing directories with owner-only permissions
    ///
    /// Fails with [`Error::Layout`] when the root exists but is not
    /// writable.
    pub fn ensure(&self) -> Result<()> {
        if self.root.exists() {
            let probe = self.root.join(".write-probe");
            match File::create(&probe) {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                }
                Err(e) => {
                    return Err(Error::Layout {
                        path: self.root.clone(),
                        reason: format!("root is not writable: {e}"),
                    });
                }
            }
        }

        for dir in [
            self.root.clone(),
            self.store_dir(),
            self.profiles_dir(),
            self.repos_dir(),
            self.sources_dir(),
            self.config_dir(),
            self.backups_dir(),
            self.staging_dir(),
        ] {
            if !dir.exists() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&dir)
                    .map_err(|e| Error::Layout {
                        path: dir.clone(),
                        reason: format!("cannot create directory: {e}"),
                    })?;
                debug!("created {}", dir.display());
            }
        }
        Ok(())
    }

    /// Acquire the root lock, waiting briefly before giving up
    ///
    /// The guard holds an exclusive `flock` on `<root>/.lock`; it is
    /// released when the guard drops.
    pub fn lock(&self) -> Result<RootLock> {
        let path = self.lock_path();
        let file = File::create(&path)?;

        const ATTEMPTS: u32 = 10;
        for attempt in 0..ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("acquired root lock at {}", path.display());
                    return Ok(RootLock { _file: file, path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if attempt + 1 < ATTEMPTS {
                        std::thread::sleep(Duration::from_millis(200));
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::LockHeld(path))
    }
}

/// Guard for the exclusive root lock; released on drop
pub struct RootLock {
    _file: File,
    path: PathBuf,
}

impl Drop for RootLock {
    fn drop(&mut self) {
        debug!("released root lock at {}", self.path.display());
    }
}
