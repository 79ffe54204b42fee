// src/transaction.rs

//! Transactions: install, uninstall, upgrade, apply, sync, rollback
//!
//! One user invocation is one transaction against the store and profile.
//! Builds run on a bounded worker pool in dependency-topology order, with
//! the content-addressed store as the only shared write target. The root
//! lock is held only for the publish step: allocate the generation number,
//! create the generation, swap `current`, write the state file. A failure
//! anywhere earlier publishes nothing and leaves the state file untouched
//! (already-stored artifacts are content-addressed and harmless).

use crate::builder::{BuildInput, BuildOutcome, Builder};
use crate::cache::BinaryCacheClient;
use crate::db;
use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;
use crate::hash::Fingerprint;
use crate::layout::Layout;
use crate::profile::{GenerationEntry, Profile};
use crate::recipe::Catalog;
use crate::resolver::{Plan, ResolveRequest, Resolver};
use crate::sandbox::{SandboxPolicy, SandboxRunner};
use crate::state::{self, StateEntry};
use crate::store::Store;
use crate::system::SystemPm;
use crate::version::{split_name_constraint, Constraint};
use chrono::Utc;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use tracing::{debug, info, warn};

/// A parsed install token: `NAME[CONSTRAINT]` or `OWNER/REPO[@REF]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSpec {
    Named {
        name: String,
        constraint: Constraint,
    },
    Remote {
        owner_repo: String,
        reference: Option<String>,
    },
}

impl RequestSpec {
    pub fn parse(token: &str) -> Result<RequestSpec> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Parse("empty package spec".into()));
        }
        if token.contains('/') {
            let (repo, reference) = match token.split_once('@') {
                Some((repo, r)) => (repo, Some(r.to_string())),
                None => (token, None),
            };
            Ok(RequestSpec::Remote {
                owner_repo: repo.to_string(),
                reference,
            })
        } else {
            let (name, constraint) = split_name_constraint(token)?;
            Ok(RequestSpec::Named { name, constraint })
        }
    }
}

/// How a transaction behaves
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub sandbox: SandboxPolicy,
    pub cache_url: Option<String>,
    /// Skip the system-PM and recipe routes; every name must be OWNER/REPO
    pub from_github: bool,
}

/// A transaction over one root
pub struct Transaction {
    layout: Layout,
    conn: Connection,
    store: Store,
    fetcher: SourceFetcher,
    runner: SandboxRunner,
    cache: Option<BinaryCacheClient>,
    from_github: bool,
}

impl Transaction {
    pub fn open(layout: Layout, options: TransactionOptions) -> Result<Self> {
        layout.ensure()?;
        let conn = db::open(&layout.db_path())?;
        let cache = match &options.cache_url {
            Some(url) => Some(BinaryCacheClient::new(url)?),
            None => None,
        };
        Ok(Self {
            store: Store::new(layout.store_dir()),
            fetcher: SourceFetcher::new(layout.sources_dir()),
            runner: SandboxRunner::new(options.sandbox),
            conn,
            cache,
            from_github: options.from_github,
            layout,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self.layout.repos_dir(), &self.conn)
    }

    pub fn profile(&self) -> Profile {
        Profile::new(self.layout.profiles_dir())
    }

    /// Install packages; returns the new generation number
    pub fn install(&self, tokens: &[String]) -> Result<u64> {
        let mut specs = Vec::with_capacity(tokens.len());
        for token in tokens {
            specs.push(RequestSpec::parse(token)?);
        }
        self.run_install(&specs)
    }

    /// Route parsed requests: recipe resolution, the system-PM fast path,
    /// or ad-hoc remote build
    ///
    /// A version constraint forces the recipe route (system package
    /// managers cannot honor constraints). A bare name goes to a recipe
    /// when one exists, otherwise to the system package manager when it
    /// advertises the package.
    fn route(
        &self,
        specs: &[RequestSpec],
    ) -> Result<(
        Vec<(SystemPm, String)>,
        Vec<ResolveRequest>,
        Vec<(String, Option<String>)>,
    )> {
        let catalog = self.catalog();
        let mut system_requests: Vec<(SystemPm, String)> = Vec::new();
        let mut recipe_requests: Vec<ResolveRequest> = Vec::new();
        let mut remote_requests: Vec<(String, Option<String>)> = Vec::new();

        for spec in specs {
            match spec {
                RequestSpec::Remote {
                    owner_repo,
                    reference,
                } => remote_requests.push((owner_repo.clone(), reference.clone())),
                RequestSpec::Named { name, .. } if self.from_github => {
                    return Err(Error::Parse(format!(
                        "'{name}' is not OWNER/REPO; --from-github requires repository paths"
                    )));
                }
                RequestSpec::Named { name, constraint } => {
                    if constraint.is_any() && !catalog.has_recipe(name)? {
                        if let Some(pm) = SystemPm::detect() {
                            if pm.available(name).unwrap_or(false) {
                                debug!("'{name}' available via {}", pm.name());
                                system_requests.push((pm, name.clone()));
                                continue;
                            }
                        }
                    }
                    recipe_requests.push(ResolveRequest::new(name.clone(), constraint.clone()));
                }
            }
        }
        Ok((system_requests, recipe_requests, remote_requests))
    }

    /// The shared install path used by install, upgrade and apply
    fn run_install(&self, specs: &[RequestSpec]) -> Result<u64> {
        let (system_requests, recipe_requests, remote_requests) = self.route(specs)?;
        self.run_routed(system_requests, recipe_requests, remote_requests)
    }

    fn run_routed(
        &self,
        system_requests: Vec<(SystemPm, String)>,
        recipe_requests: Vec<ResolveRequest>,
        remote_requests: Vec<(String, Option<String>)>,
    ) -> Result<u64> {
        let catalog = self.catalog();

        // Pin the plan before touching anything.
        let plan = if recipe_requests.is_empty() {
            Plan::default()
        } else {
            Resolver::new(&catalog).resolve(&recipe_requests)?
        };

        // System installs are not store transactions; run them first so a
        // failure aborts before any profile mutation.
        for (pm, name) in &system_requests {
            pm.install(name)?;
        }

        // Build everything (worker pool, dependency order).
        let outcomes = self.execute(&plan, &remote_requests)?;
        self.index_outcomes(&outcomes)?;

        // Compose the next generation: previous entries, then the new or
        // replaced ones.
        let profile = self.profile();
        let mut entries = self.base_entries(&profile)?;

        for (pm, name) in &system_requests {
            upsert(
                &mut entries,
                StateEntry::System {
                    pm: pm.name().to_string(),
                    name: name.clone(),
                },
                Vec::new(),
            );
        }
        for request in &recipe_requests {
            let build = plan
                .position(&request.name)
                .map(|i| &plan.builds[i])
                .expect("resolved plan covers every request");
            let keys = transitive_keys(&plan, &outcomes, &request.name);
            upsert(
                &mut entries,
                StateEntry::Recipe {
                    name: build.recipe.name.clone(),
                    version: build.recipe.version.clone(),
                },
                keys,
            );
        }
        for (owner_repo, reference) in &remote_requests {
            let outcome = outcomes
                .get(owner_repo.as_str())
                .expect("remote build completed");
            upsert(
                &mut entries,
                StateEntry::RemoteRepo {
                    owner_repo: owner_repo.clone(),
                    reference: reference.clone(),
                },
                vec![outcome.key.clone()],
            );
        }

        self.publish(&profile, entries)
    }

    /// Uninstall by name; returns the removed entries and the new
    /// generation (None when nothing matched)
    pub fn uninstall(&self, tokens: &[String]) -> Result<(Vec<StateEntry>, Option<u64>)> {
        let profile = self.profile();
        let entries = self.base_entries(&profile)?;

        let (removed, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|(entry, _)| tokens.iter().any(|t| entry.matches(t)));

        if removed.is_empty() {
            return Ok((Vec::new(), None));
        }

        for (entry, _) in &removed {
            if let StateEntry::System { pm, name } = entry {
                match SystemPm::from_name(pm) {
                    Some(pm) => {
                        if let Err(e) = pm.remove(name) {
                            warn!("system removal of '{name}' failed: {e}");
                        }
                    }
                    None => warn!("unknown system package manager '{pm}'"),
                }
            }
        }

        let generation = self.publish(&profile, kept)?;
        Ok((removed.into_iter().map(|(e, _)| e).collect(), Some(generation)))
    }

    /// Upgrade named packages, or everything when `tokens` is empty
    ///
    /// Pinned refs (tags, 40-hex commits) resolve to the same commit and
    /// store key, so they are natural no-ops; branch refs refetch and may
    /// rebuild. Recipe entries re-resolve to the newest satisfying version.
    pub fn upgrade(&self, tokens: &[String]) -> Result<u64> {
        // refresh recipe repos up front; the cache is read-only once
        // planning starts
        if let Err(e) = self.catalog().refresh_all() {
            warn!("recipe repository refresh failed: {e}");
        }

        let current = state::read(&self.layout.state_file())?;
        let targets: Vec<&StateEntry> = current
            .iter()
            .filter(|entry| {
                if tokens.is_empty() {
                    true
                } else {
                    tokens.iter().any(|t| entry.matches(t))
                }
            })
            .collect();

        let mut recipe_requests = Vec::new();
        let mut remote_requests = Vec::new();
        for entry in targets {
            match entry {
                // recipe entries stay on the recipe route: re-resolve to
                // the newest version regardless of the pinned one
                StateEntry::Recipe { name, .. } => {
                    recipe_requests.push(ResolveRequest::new(name.clone(), Constraint::any()));
                }
                StateEntry::RemoteRepo {
                    owner_repo,
                    reference,
                } => remote_requests.push((owner_repo.clone(), reference.clone())),
                StateEntry::System { .. } => {
                    // the system package manager owns upgrades of its own
                    // packages
                }
            }
        }
        self.run_routed(Vec::new(), recipe_requests, remote_requests)
    }

    /// Install every declarative entry not present in the current
    /// generation, in file order
    pub fn apply(&self) -> Result<Option<u64>> {
        let entries = state::read(&self.layout.state_file())?;
        let present: Vec<String> = self
            .profile()
            .current_manifest()?
            .map(|m| m.state_entries().iter().map(|e| e.key()).collect())
            .unwrap_or_default();

        let mut specs = Vec::new();
        for entry in &entries {
            if present.contains(&entry.key()) {
                continue;
            }
            match entry {
                StateEntry::Recipe { name, version } => specs.push(RequestSpec::Named {
                    name: name.clone(),
                    constraint: Constraint::parse(&format!("={version}"))?,
                }),
                StateEntry::RemoteRepo {
                    owner_repo,
                    reference,
                } => specs.push(RequestSpec::Remote {
                    owner_repo: owner_repo.clone(),
                    reference: reference.clone(),
                }),
                StateEntry::System { name, .. } => {
                    // routed back through the system-PM fast path
                    specs.push(RequestSpec::Named {
                        name: name.clone(),
                        constraint: Constraint::any(),
                    });
                }
            }
        }
        if specs.is_empty() {
            info!("declarative state already applied");
            return Ok(None);
        }
        Ok(Some(self.run_install(&specs)?))
    }

    /// Rewrite the state file from the current generation's manifest
    pub fn sync(&self) -> Result<Vec<StateEntry>> {
        let current = state::read(&self.layout.state_file())?;
        let snapshot = self
            .profile()
            .current_manifest()?
            .map(|m| m.state_entries())
            .unwrap_or_default();
        let merged = state::sync_entries(&current, &snapshot);

        let _lock = self.layout.lock()?;
        state::write(&self.layout.state_file(), &merged)?;
        Ok(merged)
    }

    /// Roll back to the previous generation and resync state
    pub fn rollback(&self) -> Result<u64> {
        let _lock = self.layout.lock()?;
        let profile = self.profile();
        let restored = profile.rollback()?;

        let current = state::read(&self.layout.state_file())?;
        let snapshot = profile
            .current_manifest()?
            .map(|m| m.state_entries())
            .unwrap_or_default();
        state::write(
            &self.layout.state_file(),
            &state::sync_entries(&current, &snapshot),
        )?;
        Ok(restored)
    }

    /// Entries of the current generation as (entry, keys) pairs, merged
    /// with `system:` entries that only the state file knows about
    fn base_entries(&self, profile: &Profile) -> Result<Vec<(StateEntry, Vec<Fingerprint>)>> {
        let mut entries: Vec<(StateEntry, Vec<Fingerprint>)> = Vec::new();
        if let Some(manifest) = profile.current_manifest()? {
            for gen_entry in &manifest.entries {
                match gen_entry.entry.parse::<StateEntry>() {
                    Ok(entry) => entries.push((entry, gen_entry.keys.clone())),
                    Err(reason) => warn!("dropping manifest entry '{}': {reason}", gen_entry.entry),
                }
            }
        }
        for entry in state::read(&self.layout.state_file())? {
            if matches!(entry, StateEntry::System { .. })
                && !entries.iter().any(|(e, _)| e.key() == entry.key())
            {
                entries.push((entry, Vec::new()));
            }
        }
        Ok(entries)
    }

    /// Publish a generation from entries and write the state file, all
    /// under the root lock
    fn publish(
        &self,
        profile: &Profile,
        entries: Vec<(StateEntry, Vec<Fingerprint>)>,
    ) -> Result<u64> {
        let gen_entries: Vec<GenerationEntry> = entries
            .iter()
            .map(|(entry, keys)| GenerationEntry {
                entry: entry.to_string(),
                keys: keys.clone(),
            })
            .collect();
        let state_entries: Vec<StateEntry> = entries.into_iter().map(|(e, _)| e).collect();

        let _lock = self.layout.lock()?;
        let generation = profile.publish(&self.store, &gen_entries)?;
        state::write(&self.layout.state_file(), &state_entries)?;
        Ok(generation)
    }

    /// Record built artifacts in the metadata database
    fn index_outcomes(&self, outcomes: &HashMap<String, BuildOutcome>) -> Result<()> {
        for outcome in outcomes.values() {
            db::insert_store_package(
                &self.conn,
                &db::StoreRecord {
                    key: outcome.key.to_string(),
                    name: outcome.name.clone(),
                    version: outcome.version.clone(),
                    path: outcome.path.to_string_lossy().into_owned(),
                    created: Utc::now().to_rfc3339(),
                },
            )?;
        }
        Ok(())
    }

    /// Execute a plan plus any ad-hoc remote builds on a bounded worker
    /// pool
    ///
    /// A package starts only after all its dependencies are stored. Workers
    /// own their staging directories; the store's atomic inserts make
    /// concurrent identical builds safe. The first failure stops new work.
    fn execute(
        &self,
        plan: &Plan,
        remotes: &[(String, Option<String>)],
    ) -> Result<HashMap<String, BuildOutcome>> {
        struct Job {
            name: String,
            input: BuildInput,
            /// indices into `jobs` that must complete first
            deps: Vec<usize>,
        }

        let mut jobs: Vec<Job> = Vec::new();
        for build in &plan.builds {
            let deps = build
                .dependencies
                .iter()
                .filter_map(|dep| jobs.iter().position(|j| &j.name == dep))
                .collect();
            jobs.push(Job {
                name: build.recipe.name.clone(),
                input: BuildInput::Recipe(build.recipe.clone()),
                deps,
            });
        }
        for (owner_repo, reference) in remotes {
            jobs.push(Job {
                name: owner_repo.clone(),
                input: BuildInput::Remote {
                    owner_repo: owner_repo.clone(),
                    reference: reference.clone(),
                },
                deps: Vec::new(),
            });
        }
        if jobs.is_empty() {
            return Ok(HashMap::new());
        }

        struct Board {
            done: Vec<Option<BuildOutcome>>,
            running: Vec<bool>,
            failed: Option<Error>,
            left: usize,
        }

        let builder = Builder::new(
            self.layout.staging_dir(),
            &self.store,
            &self.fetcher,
            &self.runner,
            self.cache.as_ref(),
        );
        let board = Mutex::new(Board {
            done: jobs.iter().map(|_| None).collect(),
            running: vec![false; jobs.len()],
            failed: None,
            left: jobs.len(),
        });
        let ready = Condvar::new();

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .div_euclid(2)
            .max(2)
            .min(jobs.len());
        debug!("executing {} build(s) on {workers} worker(s)", jobs.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    // pick the next ready job, or wait for one
                    let (index, dep_outcomes) = {
                        let mut guard = board.lock().expect("board lock poisoned");
                        let index = loop {
                            if guard.failed.is_some() || guard.left == 0 {
                                return;
                            }
                            let candidate = (0..jobs.len()).find(|&i| {
                                guard.done[i].is_none()
                                    && !guard.running[i]
                                    && jobs[i].deps.iter().all(|&d| guard.done[d].is_some())
                            });
                            match candidate {
                                Some(i) => break i,
                                None => {
                                    guard = ready.wait(guard).expect("board lock poisoned");
                                }
                            }
                        };
                        guard.running[index] = true;
                        let deps: Vec<BuildOutcome> = jobs[index]
                            .deps
                            .iter()
                            .map(|&d| guard.done[d].clone().expect("dependency completed"))
                            .collect();
                        (index, deps)
                    };

                    let result = builder.build(&jobs[index].input, &dep_outcomes);

                    let mut guard = board.lock().expect("board lock poisoned");
                    guard.running[index] = false;
                    match result {
                        Ok(outcome) => {
                            guard.done[index] = Some(outcome);
                            guard.left -= 1;
                        }
                        Err(e) => {
                            if guard.failed.is_none() {
                                guard.failed = Some(e);
                            }
                        }
                    }
                    ready.notify_all();
                });
            }
        });

        let board = board.into_inner().expect("board lock poisoned");
        if let Some(e) = board.failed {
            return Err(e);
        }
        let mut outcomes = HashMap::new();
        for (job, outcome) in jobs.into_iter().zip(board.done) {
            outcomes.insert(job.name, outcome.expect("all jobs completed"));
        }
        Ok(outcomes)
    }
}

/// Insert or replace an entry (matching by logical key), appending new
/// entries at the end
fn upsert(
    entries: &mut Vec<(StateEntry, Vec<Fingerprint>)>,
    entry: StateEntry,
    keys: Vec<Fingerprint>,
) {
    if let Some(position) = entries.iter().position(|(e, _)| e.key() == entry.key()) {
        entries[position] = (entry, keys);
    } else {
        entries.push((entry, keys));
    }
}

/// Every artifact key in a package's dependency closure, own build
/// included
fn transitive_keys(
    plan: &Plan,
    outcomes: &HashMap<String, BuildOutcome>,
    name: &str,
) -> Vec<Fingerprint> {
    let mut keys = Vec::new();
    let mut stack = vec![name.to_string()];
    let mut seen = std::collections::BTreeSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(outcome) = outcomes.get(&current) {
            if !keys.contains(&outcome.key) {
                keys.push(outcome.key.clone());
            }
        }
        if let Some(position) = plan.position(&current) {
            for dep in &plan.builds[position].dependencies {
                stack.push(dep.clone());
            }
        }
    }
    keys
}
