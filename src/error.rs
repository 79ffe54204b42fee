// src/error.rs

//! Error types shared across the pygr core
//!
//! Every component returns a structured [`Error`]; the CLI layer translates
//! it into a one-line message and an exit code. User mistakes (bad recipe,
//! unknown repo, unsatisfiable request) exit 1, environment failures exit 2.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the pygr core distinguishes
#[derive(Error, Debug)]
pub enum Error {
    /// Root directory exists but cannot be used
    #[error("layout error at {path}: {reason}")]
    Layout { path: PathBuf, reason: String },

    /// Recipe repository name already registered
    #[error("recipe repository '{0}' already exists")]
    RepoExists(String),

    /// Recipe repository not registered
    #[error("recipe repository '{0}' is not registered")]
    RepoMissing(String),

    /// Recipe file failed validation
    #[error("malformed recipe at {path}: {reason}")]
    RecipeMalformed { path: PathBuf, reason: String },

    /// No recipe satisfies the request
    #[error("no recipe found for '{name}'{}", constraint.as_deref().map(|c| format!(" matching {c}")).unwrap_or_default())]
    RecipeNotFound {
        name: String,
        constraint: Option<String>,
    },

    /// Remote fetch failed after retries
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Remote fetch exceeded its deadline
    #[error("fetch timed out for {0}")]
    FetchTimeout(String),

    /// No recognized build system in the source tree
    #[error("no build system detected in {0} (consider writing a recipe)")]
    NoBuildSystem(PathBuf),

    /// A build or install command exited non-zero
    #[error("build command failed ({command}): exit status {status}")]
    BuildFailed {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },

    /// A build or install command exceeded the time limit
    #[error("build command timed out after {seconds}s: {command}")]
    BuildTimeout { command: String, seconds: u64 },

    /// The dependency constraints cannot all hold
    #[error("unsatisfiable dependencies: {0}")]
    Unsatisfiable(String),

    /// Binary cache transport failure
    #[error("binary cache error: {0}")]
    CacheError(String),

    /// Binary cache content failed verification
    #[error("binary cache artifact corrupt for {key}: {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// Rollback requested with no previous generation
    #[error("no previous generation to roll back to")]
    NoPreviousGeneration,

    /// Another pygr process holds the root lock
    #[error("another pygr process holds the lock on {0}")]
    LockHeld(PathBuf),

    /// Declarative state file is malformed
    #[error("invalid state entry at {path}:{line}: {reason}")]
    StateMalformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// No system package manager available or package unknown to it
    #[error("system package manager: {0}")]
    SystemPm(String),

    /// Version or constraint string failed to parse
    #[error("parse error: {0}")]
    Parse(String),

    /// Store artifact missing or inconsistent
    #[error("store error: {0}")]
    Store(String),

    /// Metadata database failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit code for the CLI: 1 for user errors, 2 for system errors
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::RepoExists(_)
            | Error::RepoMissing(_)
            | Error::RecipeMalformed { .. }
            | Error::RecipeNotFound { .. }
            | Error::NoBuildSystem(_)
            | Error::Unsatisfiable(_)
            | Error::NoPreviousGeneration
            | Error::StateMalformed { .. }
            | Error::Parse(_)
            | Error::SystemPm(_) => 1,
            _ => 2,
        }
    }

    /// True when the failure is a mistake in user input rather than the
    /// environment
    pub fn is_user_error(&self) -> bool {
        self.exit_code() == 1
    }
}
