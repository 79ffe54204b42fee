// src/resolver/engine.rs

//! Backtracking resolution engine

use super::plan::{Plan, PinnedRecipe, ResolveRequest};
use crate::error::{Error, Result};
use crate::recipe::Candidate;
use crate::version::Constraint;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Where candidate recipes come from
///
/// Implementations return candidates newest first (version descending,
/// ties by repository name); the engine preserves that order when choosing.
pub trait RecipeSource {
    fn candidates(&self, name: &str) -> Result<Vec<Candidate>>;
}

impl RecipeSource for crate::recipe::Catalog<'_> {
    fn candidates(&self, name: &str) -> Result<Vec<Candidate>> {
        self.find_all(name)
    }
}

/// The resolver proper
pub struct Resolver<'a> {
    source: &'a dyn RecipeSource,
}

/// Mutable search state, cloned at each decision point so backtracking is
/// a plain unwind
#[derive(Clone, Default)]
struct SearchState {
    /// Names waiting to be (re)checked
    queue: VecDeque<String>,
    /// Accumulated constraint per name
    constraints: BTreeMap<String, Constraint>,
    /// Who required each name, with which constraint (for conflict reports)
    requirers: BTreeMap<String, Vec<(String, Constraint)>>,
    /// Chosen candidate per name
    selected: BTreeMap<String, Candidate>,
}

/// Outcome of one search branch: either a full selection or a conflict to
/// backtrack over
enum Branch {
    Solved(BTreeMap<String, Candidate>),
    Conflict(String),
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn RecipeSource) -> Self {
        Self { source }
    }

    /// Resolve a set of top-level requests into a pinned plan
    pub fn resolve(&self, requests: &[ResolveRequest]) -> Result<Plan> {
        let mut state = SearchState::default();
        for request in requests {
            let merged = state
                .constraints
                .get(&request.name)
                .map(|existing| existing.conjoin(&request.constraint))
                .unwrap_or_else(|| request.constraint.clone());
            state.constraints.insert(request.name.clone(), merged);
            state
                .requirers
                .entry(request.name.clone())
                .or_default()
                .push(("the request".to_string(), request.constraint.clone()));
            state.queue.push_back(request.name.clone());
        }

        let selected = match self.search(state)? {
            Branch::Solved(selected) => selected,
            Branch::Conflict(report) => return Err(Error::Unsatisfiable(report)),
        };

        self.order(selected)
    }

    /// Depth-first search over candidate choices
    fn search(&self, mut state: SearchState) -> Result<Branch> {
        let name = loop {
            let Some(name) = state.queue.pop_front() else {
                return Ok(Branch::Solved(state.selected));
            };
            let constraint = state.constraints.get(&name).cloned().unwrap_or_default();

            match state.selected.get(&name) {
                Some(candidate) => {
                    // Already pinned; a newly arrived constraint may now
                    // contradict the selection, forcing a backtrack.
                    if !constraint.satisfies(&candidate.recipe.parsed_version()) {
                        return Ok(Branch::Conflict(self.conflict_report(&state, &name)));
                    }
                }
                None => break name,
            }
        };

        let constraint = state.constraints.get(&name).cloned().unwrap_or_default();
        let candidates: Vec<Candidate> = self
            .source
            .candidates(&name)?
            .into_iter()
            .filter(|c| constraint.satisfies(&c.recipe.parsed_version()))
            .collect();

        if candidates.is_empty() {
            return Ok(Branch::Conflict(self.conflict_report(&state, &name)));
        }

        let mut last_conflict = None;
        for candidate in candidates {
            debug!(
                "trying {} {} for '{}'",
                candidate.recipe.name, candidate.recipe.version, name
            );
            let mut next = state.clone();
            next.selected.insert(name.clone(), candidate.clone());
            for dep in &candidate.recipe.dependencies {
                let merged = next
                    .constraints
                    .get(&dep.name)
                    .map(|existing| existing.conjoin(&dep.constraint))
                    .unwrap_or_else(|| dep.constraint.clone());
                next.constraints.insert(dep.name.clone(), merged);
                next.requirers
                    .entry(dep.name.clone())
                    .or_default()
                    .push((name.clone(), dep.constraint.clone()));
                next.queue.push_back(dep.name.clone());
            }

            match self.search(next)? {
                Branch::Solved(selected) => return Ok(Branch::Solved(selected)),
                Branch::Conflict(report) => last_conflict = Some(report),
            }
        }
        Ok(Branch::Conflict(
            last_conflict.expect("at least one candidate was tried"),
        ))
    }

    /// Human-readable contradiction path for a name that cannot be
    /// satisfied; names every requirer
    fn conflict_report(&self, state: &SearchState, name: &str) -> String {
        let mut parts = Vec::new();
        if let Some(requirers) = state.requirers.get(name) {
            for (requirer, constraint) in requirers {
                if constraint.is_any() {
                    parts.push(format!("required by {requirer}"));
                } else {
                    parts.push(format!("{constraint} required by {requirer}"));
                }
            }
        }
        if parts.is_empty() {
            format!("no candidate for '{name}'")
        } else {
            format!("'{name}': {}", parts.join("; "))
        }
    }

    /// Order a selection dependency-first, rejecting cycles
    fn order(&self, selected: BTreeMap<String, Candidate>) -> Result<Plan> {
        // dependency edges restricted to the selection
        let deps_of: BTreeMap<&str, Vec<&str>> = selected
            .iter()
            .map(|(name, candidate)| {
                let deps: Vec<&str> = candidate
                    .recipe
                    .dependencies
                    .iter()
                    .map(|d| d.name.as_str())
                    .filter(|dep| selected.contains_key(*dep))
                    .collect();
                (name.as_str(), deps)
            })
            .collect();

        let mut indegree: BTreeMap<&str, usize> =
            deps_of.iter().map(|(n, d)| (*n, d.len())).collect();
        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order: Vec<&str> = Vec::new();
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            order.push(name);
            for (dependent, deps) in &deps_of {
                if deps.contains(&name) {
                    let left = indegree.get_mut(dependent).expect("known node");
                    *left -= 1;
                    if *left == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != selected.len() {
            let cycle = find_cycle(&deps_of);
            return Err(Error::Unsatisfiable(format!(
                "dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }

        let builds = order
            .into_iter()
            .map(|name| {
                let candidate = selected[name].clone();
                let dependencies = candidate
                    .recipe
                    .dependencies
                    .iter()
                    .map(|d| d.name.clone())
                    .collect();
                PinnedRecipe {
                    recipe: candidate.recipe,
                    repo_name: candidate.repo_name,
                    dependencies,
                }
            })
            .collect();
        Ok(Plan { builds })
    }
}

/// Locate one cycle in a dependency map for error reporting
fn find_cycle(deps_of: &BTreeMap<&str, Vec<&str>>) -> Vec<String> {
    fn visit<'a>(
        node: &'a str,
        deps_of: &BTreeMap<&'a str, Vec<&'a str>>,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        path.push(node);
        for dep in deps_of.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(dep, deps_of, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    for node in deps_of.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, deps_of, &mut path, &mut done) {
            return cycle;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{CommandSection, Dependency, Recipe, SourceSection};
    use crate::version::split_name_constraint;
    use std::path::PathBuf;

    /// In-memory recipe source for engine tests
    struct TestSource {
        recipes: BTreeMap<String, Vec<Candidate>>,
    }

    impl TestSource {
        fn new() -> Self {
            Self {
                recipes: BTreeMap::new(),
            }
        }

        /// Add a recipe; deps are `name<constraint>` tokens
        fn add(&mut self, name: &str, version: &str, deps: &[&str]) -> &mut Self {
            let dependencies = deps
                .iter()
                .map(|spec| {
                    let (name, constraint) = split_name_constraint(spec).unwrap();
                    Dependency { name, constraint }
                })
                .collect();
            let recipe = Recipe {
                name: name.to_string(),
                version: version.to_string(),
                source: SourceSection {
                    kind: "remote-repo".into(),
                    repo: format!("example/{name}"),
                    reference: None,
                },
                build: CommandSection::default(),
                install: CommandSection::default(),
                dependencies,
            };
            let entry = self.recipes.entry(name.to_string()).or_default();
            entry.push(Candidate {
                recipe,
                repo_name: "test".into(),
                path: PathBuf::from(format!("/test/{name}-{version}.yaml")),
            });
            // newest first, as the Catalog guarantees
            entry.sort_by(|a, b| b.recipe.parsed_version().cmp(&a.recipe.parsed_version()));
            self
        }
    }

    impl RecipeSource for TestSource {
        fn candidates(&self, name: &str) -> Result<Vec<Candidate>> {
            Ok(self.recipes.get(name).cloned().unwrap_or_default())
        }
    }

    fn request(spec: &str) -> ResolveRequest {
        let (name, constraint) = split_name_constraint(spec).unwrap();
        ResolveRequest::new(name, constraint)
    }

    fn plan_names(plan: &Plan) -> Vec<&str> {
        plan.builds.iter().map(|b| b.recipe.name.as_str()).collect()
    }

    #[test]
    fn test_single_package_no_deps() {
        let mut source = TestSource::new();
        source.add("hello", "2.12", &[]);

        let plan = Resolver::new(&source).resolve(&[request("hello")]).unwrap();
        assert_eq!(plan_names(&plan), vec!["hello"]);
        assert_eq!(plan.builds[0].recipe.version, "2.12");
    }

    #[test]
    fn test_newest_satisfying_selected() {
        let mut source = TestSource::new();
        source.add("libz", "1.2.11", &[]).add("libz", "1.2.13", &[]);

        let plan = Resolver::new(&source)
            .resolve(&[request("libz>=1.2")])
            .unwrap();
        assert_eq!(plan.builds[0].recipe.version, "1.2.13");
    }

    #[test]
    fn test_dependency_ordered_before_dependent() {
        let mut source = TestSource::new();
        source
            .add("mytool", "1.0.0", &["libz>=1.2"])
            .add("libz", "1.2.11", &[])
            .add("libz", "1.2.13", &[]);

        let plan = Resolver::new(&source)
            .resolve(&[request("mytool")])
            .unwrap();
        assert_eq!(plan_names(&plan), vec!["libz", "mytool"]);
        assert_eq!(plan.builds[0].recipe.version, "1.2.13");
        assert_eq!(plan.builds[1].dependencies, vec!["libz"]);
    }

    #[test]
    fn test_diamond_dependencies_once_each() {
        let mut source = TestSource::new();
        source
            .add("app", "1.0", &["left", "right"])
            .add("left", "1.0", &["base"])
            .add("right", "1.0", &["base"])
            .add("base", "1.0", &[]);

        let plan = Resolver::new(&source).resolve(&[request("app")]).unwrap();
        assert_eq!(plan.len(), 4);
        let pos = |n| plan.position(n).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("app"));
        assert!(pos("right") < pos("app"));
        // ties broken by name: left before right
        assert!(pos("left") < pos("right"));
    }

    #[test]
    fn test_backtracks_to_older_version() {
        // newest dep of "app" requires libz>=2, but "pin" forces libz<2;
        // the resolver must fall back to app 1.0 which accepts libz 1.x
        let mut source = TestSource::new();
        source
            .add("app", "2.0", &["libz>=2.0"])
            .add("app", "1.0", &["libz>=1.0"])
            .add("pin", "1.0", &["libz<2.0"])
            .add("libz", "2.1", &[])
            .add("libz", "1.9", &[]);

        let plan = Resolver::new(&source)
            .resolve(&[request("pin"), request("app")])
            .unwrap();

        let app = &plan.builds[plan.position("app").unwrap()];
        assert_eq!(app.recipe.version, "1.0");
        let libz = &plan.builds[plan.position("libz").unwrap()];
        assert_eq!(libz.recipe.version, "1.9");
    }

    #[test]
    fn test_unsatisfiable_names_contradiction_path() {
        let mut source = TestSource::new();
        source
            .add("A", "1.0", &["B<2.0"])
            .add("C", "1.0", &["B>=2.0"])
            .add("B", "1.5", &[])
            .add("B", "2.5", &[]);

        let err = Resolver::new(&source)
            .resolve(&[request("A"), request("C")])
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Unsatisfiable(_)));
        assert!(message.contains('A'), "missing A in: {message}");
        assert!(message.contains('B'), "missing B in: {message}");
        assert!(message.contains('C'), "missing C in: {message}");
    }

    #[test]
    fn test_unknown_package_unsatisfiable() {
        let source = TestSource::new();
        let err = Resolver::new(&source).resolve(&[request("ghost")]).unwrap_err();
        assert!(matches!(err, Error::Unsatisfiable(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut source = TestSource::new();
        source
            .add("A", "1.0", &["B"])
            .add("B", "1.0", &["C"])
            .add("C", "1.0", &["A"]);

        let err = Resolver::new(&source).resolve(&[request("A")]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cycle"), "got: {message}");
        assert!(message.contains("A") && message.contains("B") && message.contains("C"));
    }

    #[test]
    fn test_duplicate_requests_intersect() {
        let mut source = TestSource::new();
        source.add("libz", "1.2.11", &[]).add("libz", "1.2.13", &[]);

        let plan = Resolver::new(&source)
            .resolve(&[request("libz>=1.2"), request("libz<1.2.13")])
            .unwrap();
        assert_eq!(plan.builds[0].recipe.version, "1.2.11");
    }

    #[test]
    fn test_shared_dep_constraint_intersection() {
        let mut source = TestSource::new();
        source
            .add("one", "1.0", &["shared>=1.0"])
            .add("two", "1.0", &["shared<1.5"])
            .add("shared", "1.9", &[])
            .add("shared", "1.2", &[]);

        let plan = Resolver::new(&source)
            .resolve(&[request("one"), request("two")])
            .unwrap();
        let shared = &plan.builds[plan.position("shared").unwrap()];
        assert_eq!(shared.recipe.version, "1.2");
    }

    #[test]
    fn test_deterministic_output() {
        let mut source = TestSource::new();
        source
            .add("app", "1.0", &["zeta", "alpha"])
            .add("zeta", "1.0", &[])
            .add("alpha", "1.0", &[]);

        let resolver = Resolver::new(&source);
        let first = plan_names(&resolver.resolve(&[request("app")]).unwrap())
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for _ in 0..5 {
            let again = plan_names(&resolver.resolve(&[request("app")]).unwrap())
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>();
            assert_eq!(first, again);
        }
        assert_eq!(first, vec!["alpha", "zeta", "app"]);
    }
}
