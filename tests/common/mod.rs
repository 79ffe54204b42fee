// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! Tests run against a throwaway root in a TempDir and fetch from local
//! git repositories, so nothing touches the network or the host package
//! manager. Builds run with the sandbox disabled for determinism.

use pygr::{Layout, SandboxPolicy, Transaction, TransactionOptions};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// A pygr root plus the origin repositories its recipes point at.
///
/// Keep the struct alive for the duration of the test; dropping it removes
/// everything.
pub struct TestRoot {
    pub tmp: TempDir,
    pub origins: Vec<TempDir>,
}

impl TestRoot {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            origins: Vec::new(),
        }
    }

    pub fn root(&self) -> std::path::PathBuf {
        self.tmp.path().join("pygr")
    }

    pub fn layout(&self) -> Layout {
        Layout::at(self.root())
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::open(
            self.layout(),
            TransactionOptions {
                sandbox: SandboxPolicy::disabled(),
                cache_url: None,
                from_github: false,
            },
        )
        .unwrap()
    }

    /// Create a local origin repository with the given files, committed on
    /// `main`; returns its path as a string
    pub fn add_origin(&mut self, files: &[(&str, &str)]) -> String {
        let origin = TempDir::new().unwrap();
        git(&["init", "--initial-branch=main", "."], origin.path());
        git(&["config", "user.email", "test@example.com"], origin.path());
        git(&["config", "user.name", "Test"], origin.path());
        for (name, content) in files {
            let path = origin.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        git(&["add", "-A"], origin.path());
        git(&["commit", "-m", "initial"], origin.path());

        let path = origin.path().to_string_lossy().into_owned();
        self.origins.push(origin);
        path
    }

    /// Create a recipe repository (a git repo of YAML files) and register
    /// it with the catalog
    pub fn add_recipe_repo(&mut self, name: &str, recipes: &[(&str, String)]) {
        let files: Vec<(&str, &str)> = recipes
            .iter()
            .map(|(file, text)| (*file, text.as_str()))
            .collect();
        let url = self.add_origin(&files);
        let transaction = self.transaction();
        transaction.catalog().add_repo(name, &url).unwrap();
    }
}

/// A recipe that installs one shell script named after the package
pub fn script_recipe(name: &str, version: &str, source_path: &str, deps: &[&str]) -> String {
    let mut text = format!(
        "name: {name}\nversion: '{version}'\nsource:\n  kind: remote-repo\n  repo: {source_path}\ninstall:\n  commands:\n    - mkdir -p {{{{prefix}}}}/bin\n    - cp run.sh {{{{prefix}}}}/bin/{name}\n    - chmod +x {{{{prefix}}}}/bin/{name}\n"
    );
    if !deps.is_empty() {
        text.push_str("dependencies:\n");
        for dep in deps {
            text.push_str(&format!("  - \"{dep}\"\n"));
        }
    }
    text
}

pub fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
