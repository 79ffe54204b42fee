// src/detect.rs

//! Build-system detection for recipe-less sources
//!
//! When a source tree arrives without a recipe, the detector inspects its
//! root and emits a canonical command sequence for the first build system
//! it recognizes. Each variant is a pure function from source tree to
//! command list; extending the set is additive.
//!
//! Priority (first match wins): Cargo, Go, CMake, Meson, Make, Node with a
//! `bin` field, Python, Ruby, Just.

use crate::error::{Error, Result};
use crate::recipe::PREFIX_PLACEHOLDER;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A recognized build system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSystem {
    /// Rust crate manifest
    Cargo,
    /// Go module file
    Go,
    /// CMake lists
    CMake,
    /// Meson build file
    Meson,
    /// Plain Makefile
    Make,
    /// Node package manifest with a `bin` field; scripts mapped name->path
    Node { bins: BTreeMap<String, String> },
    /// Python build metadata (pyproject or setup script)
    Python,
    /// Ruby Gemfile
    Ruby,
    /// Justfile with an install target
    Just,
}

impl BuildSystem {
    /// Inspect the root of a source tree
    pub fn detect(source_tree: &Path) -> Result<BuildSystem> {
        let has = |name: &str| source_tree.join(name).is_file();

        let system = if has("Cargo.toml") {
            BuildSystem::Cargo
        } else if has("go.mod") {
            BuildSystem::Go
        } else if has("CMakeLists.txt") {
            BuildSystem::CMake
        } else if has("meson.build") {
            BuildSystem::Meson
        } else if has("Makefile") || has("makefile") || has("GNUmakefile") {
            BuildSystem::Make
        } else if let Some(bins) = node_bins(source_tree) {
            BuildSystem::Node { bins }
        } else if has("pyproject.toml") || has("setup.py") {
            BuildSystem::Python
        } else if has("Gemfile") {
            BuildSystem::Ruby
        } else if has("Justfile") || has("justfile") {
            BuildSystem::Just
        } else {
            return Err(Error::NoBuildSystem(source_tree.to_path_buf()));
        };

        debug!("detected {} build in {}", system.name(), source_tree.display());
        Ok(system)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildSystem::Cargo => "cargo",
            BuildSystem::Go => "go",
            BuildSystem::CMake => "cmake",
            BuildSystem::Meson => "meson",
            BuildSystem::Make => "make",
            BuildSystem::Node { .. } => "node",
            BuildSystem::Python => "python",
            BuildSystem::Ruby => "ruby",
            BuildSystem::Just => "just",
        }
    }

    /// Canonical command sequence, with `{{prefix}}` left unexpanded
    pub fn commands(&self) -> Vec<String> {
        let p = PREFIX_PLACEHOLDER;
        match self {
            BuildSystem::Cargo => vec![
                "cargo build --release".into(),
                format!("cargo install --path . --root {p}"),
            ],
            BuildSystem::Go => vec![
                format!("mkdir -p {p}/bin"),
                format!("go build -o {p}/bin/ ./..."),
            ],
            BuildSystem::CMake => vec![
                format!("cmake -S . -B build -DCMAKE_BUILD_TYPE=Release -DCMAKE_INSTALL_PREFIX={p}"),
                "cmake --build build --parallel".into(),
                "cmake --install build".into(),
            ],
            BuildSystem::Meson => vec![
                format!("meson setup build --prefix {p}"),
                "ninja -C build".into(),
                "ninja -C build install".into(),
            ],
            BuildSystem::Make => vec![
                "make".into(),
                format!("make install PREFIX={p}"),
            ],
            BuildSystem::Node { bins } => bins
                .iter()
                .map(|(name, file)| format!("install -D -m 755 {file} {p}/bin/{name}"))
                .collect(),
            BuildSystem::Python => vec![
                format!("python3 -m pip install --prefix {p} ."),
            ],
            BuildSystem::Ruby => vec![
                format!("bundle install --deployment --path {p}/vendor"),
            ],
            BuildSystem::Just => vec![
                format!("PREFIX={p} just install"),
            ],
        }
    }

    /// Deterministic text form contributing to the build fingerprint
    pub fn descriptor(&self) -> String {
        let mut text = format!("detected:{}\n", self.name());
        for command in self.commands() {
            text.push_str(&command);
            text.push('\n');
        }
        text
    }
}

/// Parse `package.json` and return its `bin` entries, if any
///
/// The `bin` field is either a string (single executable named after the
/// package) or a map of name to script path.
fn node_bins(source_tree: &Path) -> Option<BTreeMap<String, String>> {
    let manifest = source_tree.join("package.json");
    let text = std::fs::read_to_string(manifest).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;

    let mut bins = BTreeMap::new();
    match value.get("bin")? {
        serde_json::Value::String(path) => {
            let name = value.get("name")?.as_str()?.rsplit('/').next()?;
            bins.insert(name.to_string(), path.clone());
        }
        serde_json::Value::Object(map) => {
            for (name, path) in map {
                bins.insert(name.clone(), path.as_str()?.to_string());
            }
        }
        _ => return None,
    }
    if bins.is_empty() {
        None
    } else {
        Some(bins)
    }
}
