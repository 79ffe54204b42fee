// src/recipe/mod.rs

//! Recipe catalog: declarative build descriptors fetched from git repos
//!
//! A recipe is a YAML file pinning a package's source repository, its build
//! and install commands and its dependencies. Recipe repositories are plain
//! git repositories full of such files; the catalog clones them under the
//! root and answers version-constrained lookups.

mod catalog;
mod format;

pub use catalog::{Candidate, Catalog};
pub use format::{CommandSection, Dependency, Recipe, SourceSection, PREFIX_PLACEHOLDER};
