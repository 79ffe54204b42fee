// src/resolver/mod.rs

//! Dependency resolution
//!
//! The resolver turns a set of top-level requests into a fully pinned,
//! dependency-first build plan. It walks the transitive dependency graph,
//! intersecting version constraints as it goes, backtracking over candidate
//! versions (newest first) when an intersection becomes unsatisfiable, and
//! rejecting cyclic graphs. Failure carries the packages on the
//! contradiction path.

mod engine;
mod plan;

pub use engine::{RecipeSource, Resolver};
pub use plan::{Plan, PinnedRecipe, ResolveRequest};
