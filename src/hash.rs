// src/hash.rs

//! Content fingerprints for source trees and builds
//!
//! Everything is SHA-256. Two digests matter:
//!
//! - **Tree fingerprint**: a digest over a deterministic serialization of a
//!   checked-out source tree, stable across clones of the same commit.
//! - **Build fingerprint**: the store key, a digest over the tree
//!   fingerprint, the build instructions, the dependency store keys, the
//!   prefix template and the sandbox policy marker.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Length of a fingerprint in hex characters (256 bits)
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// A 256-bit content fingerprint, stored as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a precomputed hex digest, validating shape
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == FINGERPRINT_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(s.to_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 of a byte slice as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file's content, streamed
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the tree fingerprint of a checked-out source tree
///
/// Serialization, in sorted relative-path order:
/// - regular file: `path \0 mode \0 size \0 content`
/// - symlink: `path \0 "L" \0 target`
/// - directories contribute nothing
///
/// The VCS metadata directory (`.git`) is excluded, so the digest is stable
/// across clones of the same commit.
pub fn tree_fingerprint(root: &Path) -> Result<Fingerprint> {
    // Collect first, then sort on the full relative path: the walk order
    // sorts siblings per directory, which puts `lib/a` before `lib.txt`
    // even though `.` sorts below `/`.
    let mut entries: Vec<(String, walkdir::DirEntry)> = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry =
            entry.map_err(|e| io::Error::new(io::ErrorKind::Other, format!("walk failed: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let rel_text = rel.to_string_lossy().replace('\\', "/");
        entries.push((rel_text, entry));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel_text, entry) in &entries {
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            hasher.update(rel_text.as_bytes());
            hasher.update(b"\0L\0");
            hasher.update(target.to_string_lossy().as_bytes());
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("stat failed: {e}")))?;
            hasher.update(rel_text.as_bytes());
            hasher.update(b"\0");
            hasher.update(format!("{:o}", meta.permissions().mode() & 0o777).as_bytes());
            hasher.update(b"\0");
            hasher.update(meta.len().to_string().as_bytes());
            hasher.update(b"\0");

            let mut file = File::open(entry.path())?;
            let mut buffer = [0u8; 8192];
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
        }
        // directories contribute nothing by themselves
    }

    let digest = format!("{:x}", hasher.finalize());
    Ok(Fingerprint(digest))
}

/// Compute the build fingerprint (store key) for a pinned build
///
/// Inputs are serialized line by line so the digest is reproducible:
/// the tree fingerprint, the digest of the canonical recipe text or
/// detected build descriptor (see [`sha256_hex`]), the sorted dependency
/// store keys, the prefix template and the sandbox policy marker. The
/// artifact manifest records the same inputs, so a store key can always be
/// recomputed and checked.
pub fn build_fingerprint(
    tree: &Fingerprint,
    build_digest: &str,
    dependency_keys: &[Fingerprint],
    prefix_template: &str,
    sandbox_marker: &str,
) -> Fingerprint {
    let mut deps: Vec<&str> = dependency_keys.iter().map(|k| k.as_str()).collect();
    deps.sort_unstable();

    let mut input = String::new();
    input.push_str("tree:");
    input.push_str(tree.as_str());
    input.push('\n');
    input.push_str("build:");
    input.push_str(build_digest);
    input.push('\n');
    for dep in deps {
        input.push_str("dep:");
        input.push_str(dep);
        input.push('\n');
    }
    input.push_str("prefix:");
    input.push_str(prefix_template);
    input.push('\n');
    input.push_str("sandbox:");
    input.push_str(sandbox_marker);
    input.push('\n');

    Fingerprint(sha256_hex(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_fingerprint_parse() {
        let hex = "a".repeat(64);
        assert!(Fingerprint::parse(&hex).is_some());
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"g".repeat(64)).is_none());
    }

    #[test]
    fn test_tree_fingerprint_stable_across_copies() {
        let a = TempDir::new().unwrap();
        fs::create_dir(a.path().join("src")).unwrap();
        fs::write(a.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(a.path().join("README"), "hi\n").unwrap();

        let b = TempDir::new().unwrap();
        fs::create_dir(b.path().join("src")).unwrap();
        fs::write(b.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(b.path().join("README"), "hi\n").unwrap();

        let fa = tree_fingerprint(a.path()).unwrap();
        let fb = tree_fingerprint(b.path()).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_tree_fingerprint_sees_content_changes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), "one").unwrap();
        let before = tree_fingerprint(dir.path()).unwrap();

        fs::write(dir.path().join("file"), "two").unwrap();
        let after = tree_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_tree_fingerprint_ignores_git_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), "content").unwrap();
        let before = tree_fingerprint(dir.path()).unwrap();

        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        let after = tree_fingerprint(dir.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_tree_fingerprint_orders_by_relative_path() {
        // `foo.txt` sorts before `foo/a` ('.' is 0x2e, '/' is 0x2f) even
        // though a per-directory walk visits the directory's children
        // first.
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("foo")).unwrap();
        fs::write(dir.path().join("foo/a"), "inner").unwrap();
        fs::write(dir.path().join("foo.txt"), "outer").unwrap();
        for file in ["foo/a", "foo.txt"] {
            fs::set_permissions(
                dir.path().join(file),
                fs::Permissions::from_mode(0o644),
            )
            .unwrap();
        }

        let mut expected = Vec::new();
        expected.extend_from_slice(b"foo.txt\0644\05\0outer");
        expected.extend_from_slice(b"foo/a\0644\05\0inner");

        let fingerprint = tree_fingerprint(dir.path()).unwrap();
        assert_eq!(fingerprint.as_str(), sha256_hex(&expected));
    }

    #[test]
    fn test_tree_fingerprint_includes_symlinks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real"), "content").unwrap();
        let plain = tree_fingerprint(dir.path()).unwrap();

        symlink("real", dir.path().join("alias")).unwrap();
        let with_link = tree_fingerprint(dir.path()).unwrap();
        assert_ne!(plain, with_link);
    }

    #[test]
    fn test_build_fingerprint_dep_order_irrelevant() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();
        let tree = tree_fingerprint(dir.path()).unwrap();

        let d1 = Fingerprint::parse(&sha256_hex(b"dep-one")).unwrap();
        let d2 = Fingerprint::parse(&sha256_hex(b"dep-two")).unwrap();

        let a = build_fingerprint(
            &tree,
            "make",
            &[d1.clone(), d2.clone()],
            "{{prefix}}",
            "sandbox",
        );
        let b = build_fingerprint(&tree, "make", &[d2, d1], "{{prefix}}", "sandbox");
        assert_eq!(a, b);
    }

    #[test]
    fn test_build_fingerprint_sensitive_to_inputs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();
        let tree = tree_fingerprint(dir.path()).unwrap();

        let base = build_fingerprint(&tree, "make", &[], "{{prefix}}", "sandbox");
        assert_ne!(
            base,
            build_fingerprint(&tree, "make install", &[], "{{prefix}}", "sandbox")
        );
        assert_ne!(
            base,
            build_fingerprint(&tree, "make", &[], "{{prefix}}", "no-sandbox")
        );
    }

    #[test]
    fn test_build_fingerprint_repeatable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();
        let tree = tree_fingerprint(dir.path()).unwrap();

        let a = build_fingerprint(&tree, "cargo build", &[], "{{prefix}}", "sandbox");
        let b = build_fingerprint(&tree, "cargo build", &[], "{{prefix}}", "sandbox");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), FINGERPRINT_HEX_LEN);
    }
}
