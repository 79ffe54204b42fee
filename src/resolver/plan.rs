// src/resolver/plan.rs

//! Resolution inputs and outputs

use crate::recipe::Recipe;
use crate::version::Constraint;

/// A top-level request to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub name: String,
    pub constraint: Constraint,
}

impl ResolveRequest {
    pub fn new(name: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }
}

/// One pinned build in a plan
#[derive(Debug, Clone)]
pub struct PinnedRecipe {
    /// The selected recipe
    pub recipe: Recipe,
    /// Repository the recipe came from
    pub repo_name: String,
    /// Direct dependency names, all of which appear earlier in the plan
    pub dependencies: Vec<String>,
}

/// A dependency-first ordered list of pinned builds
///
/// Every package appears after all of its dependencies; ties are broken by
/// package name.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub builds: Vec<PinnedRecipe>,
}

impl Plan {
    /// Positions of each build by name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.builds.iter().position(|b| b.recipe.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }
}
