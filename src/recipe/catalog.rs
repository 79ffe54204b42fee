// src/recipe/catalog.rs

//! Recipe repository management and lookup
//!
//! Repositories are cloned under `<root>/repos/<name>` and registered in
//! the metadata database (registration order is the listing order). Lookup
//! scans every repository for YAML files named `<pkg>.yaml` or whose `name`
//! field matches, and picks the newest version satisfying the constraint.

use crate::db;
use crate::error::{Error, Result};
use crate::fetch;
use crate::recipe::Recipe;
use crate::version::Constraint;
use chrono::Utc;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Catalog over all registered recipe repositories
pub struct Catalog<'a> {
    repos_dir: PathBuf,
    conn: &'a Connection,
}

/// A recipe together with where it was found
#[derive(Debug, Clone)]
pub struct Candidate {
    pub recipe: Recipe,
    pub repo_name: String,
    pub path: PathBuf,
}

impl<'a> Catalog<'a> {
    pub fn new(repos_dir: impl Into<PathBuf>, conn: &'a Connection) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            conn,
        }
    }

    /// Clone and register a recipe repository
    pub fn add_repo(&self, name: &str, url: &str) -> Result<()> {
        if db::get_repo(self.conn, name)?.is_some() {
            return Err(Error::RepoExists(name.to_string()));
        }
        let dest = self.repos_dir.join(name);
        if dest.exists() {
            return Err(Error::RepoExists(name.to_string()));
        }

        fetch::clone_repo(url, &dest)?;
        db::insert_repo(
            self.conn,
            &db::RepoRecord {
                name: name.to_string(),
                url: url.to_string(),
                path: dest.to_string_lossy().into_owned(),
                last_refresh: Some(Utc::now().to_rfc3339()),
            },
        )?;
        info!("added recipe repository '{name}' from {url}");
        Ok(())
    }

    /// Update one repository clone (explicit operation, taken before
    /// planning; the cache is read-only during a plan)
    pub fn refresh(&self, name: &str) -> Result<()> {
        let record =
            db::get_repo(self.conn, name)?.ok_or_else(|| Error::RepoMissing(name.to_string()))?;
        fetch::update_repo(&record.url, Path::new(&record.path))?;
        db::touch_repo(self.conn, name, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// Update every registered repository
    pub fn refresh_all(&self) -> Result<()> {
        for repo in self.list_repos()? {
            self.refresh(&repo.name)?;
        }
        Ok(())
    }

    /// Registered repositories in insertion order
    pub fn list_repos(&self) -> Result<Vec<db::RepoRecord>> {
        db::list_repos(self.conn)
    }

    /// Every valid candidate for `name`, newest first
    ///
    /// Ordering: version descending, then version text descending, then
    /// repository name ascending. Files that fail to parse are skipped with
    /// a warning.
    pub fn find_all(&self, name: &str) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();

        for repo in self.list_repos()? {
            let repo_path = Path::new(&repo.path);
            if !repo_path.is_dir() {
                warn!("repository '{}' clone missing at {}", repo.name, repo.path);
                continue;
            }
            for entry in WalkDir::new(repo_path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git")
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let is_yaml = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                );
                if !is_yaml {
                    continue;
                }
                let stem_matches = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s == name)
                    .unwrap_or(false);

                let recipe = match Recipe::load(path) {
                    Ok(recipe) => recipe,
                    Err(e) => {
                        if stem_matches {
                            return Err(e);
                        }
                        debug!("skipping unreadable recipe {}: {e}", path.display());
                        continue;
                    }
                };
                if stem_matches || recipe.name == name {
                    candidates.push(Candidate {
                        recipe,
                        repo_name: repo.name.clone(),
                        path: path.to_path_buf(),
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.recipe
                .parsed_version()
                .cmp(&a.recipe.parsed_version())
                .then_with(|| b.recipe.version.cmp(&a.recipe.version))
                .then_with(|| a.repo_name.cmp(&b.repo_name))
        });
        Ok(candidates)
    }

    /// The newest candidate satisfying a constraint
    pub fn find(&self, name: &str, constraint: &Constraint) -> Result<Candidate> {
        self.find_all(name)?
            .into_iter()
            .find(|c| constraint.satisfies(&c.recipe.parsed_version()))
            .ok_or_else(|| Error::RecipeNotFound {
                name: name.to_string(),
                constraint: if constraint.is_any() {
                    None
                } else {
                    Some(constraint.to_string())
                },
            })
    }

    /// Whether any candidate exists for `name`, regardless of version
    pub fn has_recipe(&self, name: &str) -> Result<bool> {
        Ok(!self.find_all(name)?.is_empty())
    }
}
