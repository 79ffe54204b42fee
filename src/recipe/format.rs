// src/recipe/format.rs

//! Recipe file format
//!
//! Recipes are YAML mappings:
//!
//! ```yaml
//! name: mytool
//! version: 1.4.0
//! source:
//!   kind: remote-repo
//!   repo: example/mytool
//!   ref: v1.4.0
//! build:
//!   commands:
//!     - make
//! install:
//!   commands:
//!     - make install PREFIX={{prefix}}
//! dependencies:
//!   - libz>=1.2
//! ```
//!
//! `{{prefix}}` is the only expansion token; it is replaced with the staging
//! prefix at build time. Unknown fields are ignored.

use crate::error::{Error, Result};
use crate::version::{split_name_constraint, Constraint, Version};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

/// The single expansion token recipes may reference
pub const PREFIX_PLACEHOLDER: &str = "{{prefix}}";

/// A complete recipe for building one package from source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package name
    pub name: String,

    /// Package version (dotted-numeric token)
    pub version: String,

    /// Where the source comes from
    pub source: SourceSection,

    /// Build commands, run before install commands
    #[serde(default)]
    pub build: CommandSection,

    /// Install commands; must place results under `{{prefix}}`
    #[serde(default)]
    pub install: CommandSection,

    /// Dependencies as `name` or `name<constraint>` tokens
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Source location section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source kind; `remote-repo` (alias: `github`)
    pub kind: String,

    /// Repository as `owner/name`
    pub repo: String,

    /// Branch, tag or 40-hex commit; the remote default branch when absent
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

/// A list of shell commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSection {
    #[serde(default)]
    pub commands: Vec<String>,
}

/// One dependency declaration, parsed from a `name<constraint>` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Constraint,
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let spec = String::deserialize(deserializer)?;
        let (name, constraint) =
            split_name_constraint(&spec).map_err(|e| D::Error::custom(e.to_string()))?;
        Ok(Dependency { name, constraint })
    }
}

impl Serialize for Dependency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.constraint)
        }
    }
}

impl Recipe {
    /// Load and validate a recipe file
    pub fn load(path: &Path) -> Result<Recipe> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::RecipeMalformed {
            path: path.to_path_buf(),
            reason: format!("cannot read file: {e}"),
        })?;
        let recipe: Recipe = serde_yaml::from_str(&text).map_err(|e| Error::RecipeMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        recipe.validate(path)?;
        Ok(recipe)
    }

    /// Validate field contents beyond what serde enforces
    pub fn validate(&self, path: &Path) -> Result<()> {
        let malformed = |reason: String| Error::RecipeMalformed {
            path: path.to_path_buf(),
            reason,
        };

        if self.name.is_empty() {
            return Err(malformed("empty 'name' field".into()));
        }
        Version::parse(&self.version)
            .map_err(|e| malformed(format!("invalid 'version' field: {e}")))?;

        match self.source.kind.as_str() {
            "remote-repo" | "github" => {}
            other => {
                return Err(malformed(format!("unsupported source kind '{other}'")));
            }
        }
        if !self.source.repo.contains('/') {
            return Err(malformed(format!(
                "source repo '{}' is not of the form owner/name",
                self.source.repo
            )));
        }

        for command in self.build.commands.iter().chain(&self.install.commands) {
            for token in template_tokens(command) {
                if token != PREFIX_PLACEHOLDER {
                    return Err(malformed(format!(
                        "unknown template token '{token}' (only '{{{{prefix}}}}' is allowed)"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parsed version
    pub fn parsed_version(&self) -> Version {
        // validate() already proved this parses
        Version::parse(&self.version).expect("validated recipe version")
    }

    /// Deterministic serialization feeding the build fingerprint
    ///
    /// Fields are emitted in a fixed order; two recipes with identical
    /// content always produce identical text.
    pub fn canonical_text(&self) -> String {
        let deps: Vec<String> = self.dependencies.iter().map(|d| d.to_string()).collect();
        let value = serde_json::json!({
            "name": self.name,
            "version": self.version,
            "source": {
                "kind": self.source.kind,
                "repo": self.source.repo,
                "ref": self.source.reference,
            },
            "build": self.build.commands,
            "install": self.install.commands,
            "dependencies": deps,
        });
        value.to_string()
    }
}

/// Extract `{{...}}` tokens from a command string
fn template_tokens(command: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = command;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            break;
        };
        tokens.push(&rest[start..start + end + 2]);
        rest = &rest[start + end + 2..];
    }
    tokens
}
