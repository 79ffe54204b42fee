// src/fetch.rs

//! Source fetching from remote git repositories
//!
//! The fetcher materializes a checkout of a remote repository at a named
//! ref (branch, tag or 40-hex commit) under `<root>/sources/` and computes
//! the tree fingerprint of the result. Clones are kept and updated
//! incrementally. Network operations retry with exponential backoff before
//! surfacing `FetchFailed`.
//!
//! git runs as a subprocess with `GIT_TERMINAL_PROMPT=0`; pygr never wants
//! an interactive credential prompt mid-transaction.

use crate::error::{Error, Result};
use crate::hash::{tree_fingerprint, Fingerprint};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Retry schedule for network operations: attempts and backoff bounds
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);

/// Wall-clock limit for a single git invocation
const GIT_TIMEOUT: Duration = Duration::from_secs(600);

/// A materialized source checkout
#[derive(Debug, Clone)]
pub struct Checkout {
    /// Local path of the checked-out tree
    pub path: PathBuf,
    /// Commit the ref resolved to
    pub commit: String,
    /// Tree fingerprint of the checkout (`.git` excluded)
    pub tree: Fingerprint,
}

/// Fetches and caches source checkouts under one directory
pub struct SourceFetcher {
    sources_dir: PathBuf,
    /// Serializes clone-directory access; parallel workers may request the
    /// same repository
    lock: std::sync::Mutex<()>,
}

impl SourceFetcher {
    pub fn new(sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources_dir: sources_dir.into(),
            lock: std::sync::Mutex::new(()),
        }
    }

    /// Clone or update `remote_url`, check out `reference`, and fingerprint
    /// the tree
    ///
    /// `None` means the remote default branch. Ambiguous names resolve to
    /// the tag. The result is an immutable per-commit directory, so a
    /// pinned 40-hex ref with an existing checkout needs no network at all.
    pub fn fetch(&self, remote_url: &str, reference: Option<&str>) -> Result<Checkout> {
        let _guard = self.lock.lock().expect("fetcher lock poisoned");
        let repo_slug = sanitize_url(remote_url);

        // Pinned-commit fast path: the checkout already exists, skip the
        // network entirely.
        if let Some(r) = reference {
            if is_commit(r) {
                let checkout_dir = self.checkout_dir(&repo_slug, r);
                if checkout_dir.is_dir() {
                    let tree = tree_fingerprint(&checkout_dir)?;
                    debug!("reusing pinned checkout {}", checkout_dir.display());
                    return Ok(Checkout {
                        path: checkout_dir,
                        commit: r.to_string(),
                        tree,
                    });
                }
            }
        }

        let clone_dir = self.sources_dir.join(".clones").join(&repo_slug);
        if clone_dir.join(".git").exists() {
            debug!("updating existing clone at {}", clone_dir.display());
            with_retries(remote_url, || {
                git(&["fetch", "--tags", "--prune", "origin"], Some(&clone_dir))
            })?;
        } else {
            info!("cloning {remote_url}");
            std::fs::create_dir_all(
                clone_dir.parent().expect("clone dir has a parent"),
            )?;
            let dest = clone_dir.to_string_lossy().into_owned();
            with_retries(remote_url, || git(&["clone", remote_url, &dest], None))?;
        }

        let commit = resolve_ref(&clone_dir, remote_url, reference)?;
        let checkout_dir = self.checkout_dir(&repo_slug, &commit);
        if !checkout_dir.is_dir() {
            git(&["checkout", "--force", "--detach", &commit], Some(&clone_dir))?;
            git(&["clean", "-fdx"], Some(&clone_dir))?;
            copy_tree(&clone_dir, &checkout_dir)?;
        }

        let tree = tree_fingerprint(&checkout_dir)?;
        debug!("checkout {} at {} -> tree {}", remote_url, commit, tree.short());
        Ok(Checkout {
            path: checkout_dir,
            commit,
            tree,
        })
    }

    /// Immutable per-commit checkout location
    fn checkout_dir(&self, repo_slug: &str, commit: &str) -> PathBuf {
        let short = &commit[..commit.len().min(12)];
        self.sources_dir.join(format!("{repo_slug}@{short}"))
    }
}

/// Whether a ref is a full 40-hex commit id
fn is_commit(reference: &str) -> bool {
    reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Copy a source tree, excluding VCS metadata
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("walking {}: {e}", from.display()))
        })?;
        let rel = entry.path().strip_prefix(from).expect("entry under root");
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(target, &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Resolve a ref name to a commit, preferring tags over branches
fn resolve_ref(clone_dir: &Path, url: &str, reference: Option<&str>) -> Result<String> {
    let candidates: Vec<String> = match reference {
        Some(r) if is_commit(r) => {
            vec![format!("{r}^{{commit}}")]
        }
        Some(r) => vec![
            format!("refs/tags/{r}^{{commit}}"),
            format!("refs/remotes/origin/{r}^{{commit}}"),
            format!("{r}^{{commit}}"),
        ],
        None => vec![
            "refs/remotes/origin/HEAD^{commit}".to_string(),
            "FETCH_HEAD^{commit}".to_string(),
        ],
    };

    for candidate in &candidates {
        if let Ok(out) = git(&["rev-parse", "--verify", candidate], Some(clone_dir)) {
            let commit = out.trim().to_string();
            if !commit.is_empty() {
                return Ok(commit);
            }
        }
    }
    Err(Error::FetchFailed {
        url: url.to_string(),
        reason: format!(
            "cannot resolve ref '{}'",
            reference.unwrap_or("<default branch>")
        ),
    })
}

/// Clone a repository once (no ref handling); used for recipe repos
pub fn clone_repo(url: &str, dest: &Path) -> Result<()> {
    let dest_str = dest.to_string_lossy().into_owned();
    with_retries(url, || git(&["clone", url, &dest_str], None))?;
    Ok(())
}

/// Fast-forward an existing clone's working tree
pub fn update_repo(url: &str, dir: &Path) -> Result<()> {
    with_retries(url, || git(&["pull", "--ff-only"], Some(dir)))?;
    Ok(())
}

/// Translate a remote URL into a stable directory name
fn sanitize_url(url: &str) -> String {
    let trimmed = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("git@");
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Run one git command, capturing stdout
fn git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| Error::FetchFailed {
        url: "git".into(),
        reason: format!("cannot run git: {e}"),
    })?;

    match child.wait_timeout(GIT_TIMEOUT)? {
        Some(status) => {
            let output = child.wait_with_output()?;
            if status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::FetchFailed {
                    url: format!("git {}", args.first().unwrap_or(&"")),
                    reason: stderr.trim().to_string(),
                })
            }
        }
        None => {
            let _ = child.kill();
            Err(Error::FetchTimeout(format!("git {}", args.join(" "))))
        }
    }
}

/// Run a network operation with exponential backoff
///
/// Three attempts; delays of 500ms then 1s (doubling, capped at 8s). The
/// final error is surfaced with the remote URL attached.
fn with_retries<T>(url: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = RETRY_BASE;
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("fetch attempt {attempt}/{RETRY_ATTEMPTS} failed for {url}: {e}");
                last_err = Some(e);
                if attempt < RETRY_ATTEMPTS {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                }
            }
        }
    }
    match last_err.expect("at least one attempt ran") {
        Error::FetchFailed { reason, .. } => Err(Error::FetchFailed {
            url: url.to_string(),
            reason,
        }),
        other => Err(other),
    }
}

/// Build the clone URL for an `owner/repo` forge path
pub fn forge_url(owner_repo: &str) -> String {
    format!("https://github.com/{owner_repo}.git")
}

/// Resolve a recipe/request source to a clone URL
///
/// Absolute paths and full URLs pass through unchanged; anything else is
/// treated as an `owner/repo` forge path.
pub fn source_url(repo: &str) -> String {
    if repo.starts_with('/') || repo.contains("://") || repo.starts_with("git@") {
        repo.to_string()
    } else {
        forge_url(repo)
    }
}
