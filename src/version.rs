// src/version.rs

//! Version parsing and constraint satisfaction for package requests
//!
//! Versions are dotted-numeric tokens with an optional pre-release suffix
//! (`1.2.3`, `1.2`, `2.0.0-rc.1`). Comparison uses semver when both sides
//! parse as semver (which gets pre-release ordering right), falling back to
//! segment-wise numeric comparison otherwise.
//!
//! Constraints are conjunctions of `(op, version)` clauses:
//! `=`, `!=`, `<`, `<=`, `>`, `>=` and the pessimistic `~>`
//! (spelled `compatible-with` in recipes if preferred).

use crate::error::{Error, Result};
use semver::Version as SemVersion;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed package version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Dotted numeric segments, e.g. `[1, 2, 3]`
    pub segments: Vec<u64>,
    /// Pre-release suffix after `-`, e.g. `rc.1`
    pub pre: Option<String>,
    /// Original text, preserved for display
    raw: String,
}

impl Version {
    /// Parse a version string
    ///
    /// Accepts `1`, `1.2`, `1.2.3`, `1.2.3-rc.1`, with an optional leading
    /// `v` (tags are often spelled `v13.0.0`).
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::Parse("empty version string".into()));
        }
        let body = raw.strip_prefix('v').unwrap_or(raw);

        let (numeric, pre) = match body.split_once('-') {
            Some((n, p)) => (n, Some(p.to_string())),
            None => (body, None),
        };

        let mut segments = Vec::new();
        for part in numeric.split('.') {
            let seg = part
                .parse::<u64>()
                .map_err(|_| Error::Parse(format!("invalid version segment '{part}' in '{raw}'")))?;
            segments.push(seg);
        }
        if segments.is_empty() {
            return Err(Error::Parse(format!("no numeric segments in '{raw}'")));
        }

        Ok(Self {
            segments,
            pre,
            raw: raw.to_string(),
        })
    }

    /// Normalize to a semver version when the shape allows it
    ///
    /// Versions with fewer than three segments are padded with zeros so
    /// `1.2` compares as `1.2.0`.
    fn to_semver(&self) -> Option<SemVersion> {
        if self.segments.len() > 3 {
            return None;
        }
        let major = *self.segments.first().unwrap_or(&0);
        let minor = *self.segments.get(1).unwrap_or(&0);
        let patch = *self.segments.get(2).unwrap_or(&0);
        let mut v = SemVersion::new(major, minor, patch);
        if let Some(pre) = &self.pre {
            v.pre = semver::Prerelease::new(pre).ok()?;
        }
        Some(v)
    }

    /// Compare two versions
    pub fn compare(&self, other: &Version) -> Ordering {
        if let (Some(a), Some(b)) = (self.to_semver(), other.to_semver()) {
            return a.cmp(&b);
        }

        // Segment-wise numeric comparison, missing segments count as zero
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        // A pre-release sorts before the same release without one
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Constraint operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Pessimistic operator: `~> 1.2.3` means `>= 1.2.3, < 1.3.0`
    Compatible,
}

impl Op {
    fn symbol(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Compatible => "~>",
        }
    }
}

/// A conjunction of `(op, version)` clauses
///
/// The empty constraint accepts any version. Equality is structural:
/// two constraints are equal when their clause lists are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    pub clauses: Vec<(Op, Version)>,
}

impl Constraint {
    /// The constraint accepting every version
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parse a constraint string
    ///
    /// Examples: `""` (any), `>=1.2`, `=1.5.0`, `>=1.0, <2.0`, `~>1.2.3`,
    /// `compatible-with 1.2`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let mut clauses = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            clauses.push(Self::parse_clause(part)?);
        }
        Ok(Self { clauses })
    }

    fn parse_clause(s: &str) -> Result<(Op, Version)> {
        let table: &[(&str, Op)] = &[
            ("compatible-with", Op::Compatible),
            ("~>", Op::Compatible),
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("!=", Op::Ne),
            ("==", Op::Eq),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
        ];
        for (prefix, op) in table {
            if let Some(rest) = s.strip_prefix(prefix) {
                return Ok((*op, Version::parse(rest.trim())?));
            }
        }
        // A bare version means exact match
        Ok((Op::Eq, Version::parse(s)?))
    }

    /// Check whether a version satisfies every clause
    pub fn satisfies(&self, version: &Version) -> bool {
        self.clauses.iter().all(|(op, bound)| match op {
            Op::Eq => version.compare(bound) == Ordering::Equal,
            Op::Ne => version.compare(bound) != Ordering::Equal,
            Op::Lt => version.compare(bound) == Ordering::Less,
            Op::Le => version.compare(bound) != Ordering::Greater,
            Op::Gt => version.compare(bound) == Ordering::Greater,
            Op::Ge => version.compare(bound) != Ordering::Less,
            Op::Compatible => {
                version.compare(bound) != Ordering::Less && version < &compatible_ceiling(bound)
            }
        })
    }

    /// Conjoin with another constraint, dropping duplicate clauses
    pub fn conjoin(&self, other: &Constraint) -> Constraint {
        let mut clauses = self.clauses.clone();
        for clause in &other.clauses {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        Constraint { clauses }
    }
}

/// Exclusive upper bound for the pessimistic operator
///
/// `~> 1.2.3` caps at `1.3.0`; `~> 1.2` caps at `2.0`.
fn compatible_ceiling(bound: &Version) -> Version {
    let mut segments = bound.segments.clone();
    if segments.len() >= 2 {
        segments.truncate(segments.len() - 1);
    }
    if let Some(last) = segments.last_mut() {
        *last += 1;
    }
    let raw = segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".");
    Version {
        segments,
        pre: None,
        raw,
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|(op, v)| format!("{}{}", op.symbol(), v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a request token like `libz>=1.2` into a name and its constraint
///
/// The name ends at the first operator character; the remainder parses as
/// the constraint. `mytool` alone means any version.
pub fn split_name_constraint(spec: &str) -> Result<(String, Constraint)> {
    let spec = spec.trim();
    let boundary = spec
        .find(|c| matches!(c, '<' | '>' | '=' | '!' | '~'))
        .unwrap_or(spec.len());
    let (name, rest) = spec.split_at(boundary);
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Parse(format!("missing package name in '{spec}'")));
    }
    Ok((name.to_string(), Constraint::parse(rest)?))
}
