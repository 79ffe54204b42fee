// tests/workflow.rs

//! End-to-end transaction tests: install, uninstall, upgrade, rollback,
//! export/import, all against local git origins.

mod common;

use common::{git, script_recipe, TestRoot};
use pygr::{state, Error, StateEntry};
use std::fs;
use std::path::Path;

/// Install a recipe package: artifact stored, generation published, state
/// written, executable on the profile path.
#[test]
fn install_recipe_package() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho hello\n")]);
    root.add_recipe_repo(
        "core",
        &[("zzhello.yaml", script_recipe("zzhello", "2.12", &origin, &[]))],
    );

    let transaction = root.transaction();
    let generation = transaction.install(&["zzhello=2.12".to_string()]).unwrap();
    assert_eq!(generation, 1);

    // state lists exactly the requested package
    let entries = state::read(&root.layout().state_file()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0],
        StateEntry::Recipe {
            name: "zzhello".into(),
            version: "2.12".into()
        }
    );

    // the executable is advertised through the profile
    let bin = root.layout().profiles_dir().join("current/bin/zzhello");
    assert!(bin.exists());

    // exactly one artifact, and its manifest reproduces its key
    let keys = transaction.store().enumerate().unwrap();
    assert_eq!(keys.len(), 1);
    assert!(transaction.store().verify(&keys[0]).unwrap());
}

/// The declarative state equals the current generation's advertised set
/// after every mutation (P1), and repeated installs reuse the store.
#[test]
fn state_tracks_generations_across_mutations() {
    let mut root = TestRoot::new();
    let origin_a = root.add_origin(&[("run.sh", "#!/bin/sh\necho a\n")]);
    let origin_b = root.add_origin(&[("run.sh", "#!/bin/sh\necho b\n")]);
    root.add_recipe_repo(
        "core",
        &[
            ("zztoola.yaml", script_recipe("zztoola", "1.0", &origin_a, &[])),
            ("zztoolb.yaml", script_recipe("zztoolb", "1.0", &origin_b, &[])),
        ],
    );

    let transaction = root.transaction();
    transaction.install(&["zztoola=1.0".to_string()]).unwrap();
    transaction.install(&["zztoolb=1.0".to_string()]).unwrap();

    let profile = transaction.profile();
    let manifest = profile.current_manifest().unwrap().unwrap();
    let state_entries = state::read(&root.layout().state_file()).unwrap();
    let manifest_keys: Vec<String> = manifest.state_entries().iter().map(|e| e.key()).collect();
    let state_keys: Vec<String> = state_entries.iter().map(|e| e.key()).collect();
    assert_eq!(manifest_keys, state_keys);
    assert_eq!(state_keys.len(), 2);

    // installing the same thing again republishes but reuses the artifact
    let before = transaction.store().enumerate().unwrap();
    transaction.install(&["zztoola=1.0".to_string()]).unwrap();
    assert_eq!(before, transaction.store().enumerate().unwrap());
    assert_eq!(profile.current(), Some(3));
}

/// Resolver tie-break: the newest satisfying dependency version is chosen
/// and recorded in the dependent's manifest.
#[test]
fn dependency_resolution_picks_newest() {
    let mut root = TestRoot::new();
    let libz_origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho libz\n")]);
    let tool_origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho tool\n")]);
    root.add_recipe_repo(
        "core",
        &[
            (
                "zzlibz-old.yaml",
                script_recipe("zzlibz", "1.2.11", &libz_origin, &[]),
            ),
            (
                "zzlibz-new.yaml",
                script_recipe("zzlibz", "1.2.13", &libz_origin, &[]),
            ),
            (
                "zzmytool.yaml",
                script_recipe("zzmytool", "1.0.0", &tool_origin, &["zzlibz>=1.2"]),
            ),
        ],
    );

    let transaction = root.transaction();
    transaction.install(&["zzmytool=1.0.0".to_string()]).unwrap();

    // state lists only the top-level request; the dependency is implicit
    let entries = state::read(&root.layout().state_file()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].display_name(), "zzmytool");

    // the tool's manifest records the 1.2.13 dependency key
    let store = transaction.store();
    let keys = store.enumerate().unwrap();
    assert_eq!(keys.len(), 2);
    let manifests: Vec<_> = keys
        .iter()
        .map(|k| store.artifact_manifest(k).unwrap())
        .collect();
    let libz = manifests.iter().find(|m| m.name == "zzlibz").unwrap();
    let tool = manifests.iter().find(|m| m.name == "zzmytool").unwrap();
    assert_eq!(libz.version, "1.2.13");
    assert_eq!(tool.dependencies.len(), 1);
    let dep_key = tool.dependencies[0].clone();
    assert_eq!(store.artifact_manifest(&dep_key).unwrap().name, "zzlibz");

    // both artifacts appear in the generation entry for the tool
    let manifest = transaction.profile().current_manifest().unwrap().unwrap();
    assert_eq!(manifest.entries.len(), 1);
    assert_eq!(manifest.entries[0].keys.len(), 2);
}

/// Unsatisfiable constraints surface with every package on the
/// contradiction path named.
#[test]
fn conflicting_constraints_are_unsatisfiable() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho x\n")]);
    root.add_recipe_repo(
        "core",
        &[
            (
                "zzalpha.yaml",
                script_recipe("zzalpha", "1.0", &origin, &["zzbase<2.0"]),
            ),
            (
                "zzgamma.yaml",
                script_recipe("zzgamma", "1.0", &origin, &["zzbase>=2.0"]),
            ),
            ("zzbase1.yaml", script_recipe("zzbase", "1.5", &origin, &[])),
            ("zzbase2.yaml", script_recipe("zzbase", "2.5", &origin, &[])),
        ],
    );

    let transaction = root.transaction();
    let err = transaction
        .install(&["zzalpha=1.0".to_string(), "zzgamma=1.0".to_string()])
        .unwrap_err();
    assert!(matches!(err, Error::Unsatisfiable(_)));
    let message = err.to_string();
    for name in ["zzalpha", "zzbase", "zzgamma"] {
        assert!(message.contains(name), "missing {name} in: {message}");
    }

    // nothing was published
    assert_eq!(transaction.profile().current(), None);
    assert!(state::read(&root.layout().state_file()).unwrap().is_empty());
}

/// Ad-hoc remote build: install OWNER/REPO@REF via the detector, state
/// carries the remote entry, and a re-run reuses the store key.
#[test]
fn adhoc_remote_install_and_reinstall() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[(
        "Makefile",
        "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\tcp tool.sh $(PREFIX)/bin/zztool\n\tchmod +x $(PREFIX)/bin/zztool\n",
    ), (
        "tool.sh",
        "#!/bin/sh\necho tool\n",
    )]);
    git(&["tag", "v1.0.0"], Path::new(&origin));

    let transaction = root.transaction();
    let spec = format!("{origin}@v1.0.0");
    transaction.install(&[spec.clone()]).unwrap();

    let entries = state::read(&root.layout().state_file()).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(matches!(
        &entries[0],
        StateEntry::RemoteRepo { reference: Some(r), .. } if r == "v1.0.0"
    ));
    assert!(root
        .layout()
        .profiles_dir()
        .join("current/bin/zztool")
        .exists());

    // same command again: same key in the store, new generation published
    let keys_before = transaction.store().enumerate().unwrap();
    transaction.install(&[spec]).unwrap();
    assert_eq!(keys_before, transaction.store().enumerate().unwrap());
    assert_eq!(transaction.profile().current(), Some(2));
}

/// Rollback restores the pre-install generation and the state follows
/// (P4, scenario 4).
#[test]
fn rollback_restores_previous_generation() {
    let mut root = TestRoot::new();
    let cow_origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho moo\n")]);
    let hello_origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho hi\n")]);
    root.add_recipe_repo(
        "core",
        &[
            (
                "zzcowsay.yaml",
                script_recipe("zzcowsay", "3.04", &cow_origin, &[]),
            ),
            (
                "zzhello.yaml",
                script_recipe("zzhello", "2.12", &hello_origin, &[]),
            ),
        ],
    );

    let transaction = root.transaction();
    transaction.install(&["zzcowsay=3.04".to_string()]).unwrap();
    let before = transaction.profile().current().unwrap();

    transaction.install(&["zzhello=2.12".to_string()]).unwrap();
    assert_eq!(transaction.profile().current(), Some(before + 1));

    let restored = transaction.rollback().unwrap();
    assert_eq!(restored, before);
    assert_eq!(transaction.profile().current(), Some(before));

    // list reports only cowsay
    let entries = state::read(&root.layout().state_file()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].display_name(), "zzcowsay");

    // rollback with nothing left to roll back to fails cleanly
    transaction.rollback().unwrap();
    // (swapped forward again; both links exist so this succeeded)
}

/// Uninstall drops the entry, republishes, and leaves the store alone.
#[test]
fn uninstall_drops_entry_and_republishes() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho x\n")]);
    root.add_recipe_repo(
        "core",
        &[("zztool.yaml", script_recipe("zztool", "1.0", &origin, &[]))],
    );

    let transaction = root.transaction();
    transaction.install(&["zztool=1.0".to_string()]).unwrap();

    let (removed, generation) = transaction.uninstall(&["zztool".to_string()]).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(generation, Some(2));
    assert!(state::read(&root.layout().state_file()).unwrap().is_empty());
    assert!(!root
        .layout()
        .profiles_dir()
        .join("current/bin/zztool")
        .exists());

    // artifacts stay in the store until compaction
    assert_eq!(transaction.store().enumerate().unwrap().len(), 1);

    // uninstalling something absent is a clean no-op
    let (removed, generation) = transaction.uninstall(&["ghost".to_string()]).unwrap();
    assert!(removed.is_empty());
    assert_eq!(generation, None);
}

/// Export on one root, import + apply on a fresh root, same artifact keys
/// (P6).
#[test]
fn export_import_apply_reproduces_artifacts() {
    let mut first = TestRoot::new();
    let origin = first.add_origin(&[("run.sh", "#!/bin/sh\necho portable\n")]);
    let recipe = script_recipe("zzport", "1.0", &origin, &[]);
    first.add_recipe_repo("core", &[("zzport.yaml", recipe.clone())]);

    let transaction = first.transaction();
    transaction.install(&["zzport=1.0".to_string()]).unwrap();
    let original_keys = transaction.store().enumerate().unwrap();

    let exported = first.root().join("exported.conf");
    let entries = state::read(&first.layout().state_file()).unwrap();
    state::write(&exported, &entries).unwrap();

    // fresh root with the same recipe repository
    let mut second = TestRoot::new();
    second.add_recipe_repo("core", &[("zzport.yaml", recipe)]);
    let imported = state::read(&exported).unwrap();
    state::write(&second.layout().state_file(), &imported).unwrap();

    let transaction = second.transaction();
    transaction.apply().unwrap();
    assert_eq!(transaction.store().enumerate().unwrap(), original_keys);

    // a second apply is a no-op
    assert!(transaction.apply().unwrap().is_none());
}

/// Upgrade refetches a branch ref and rebuilds only when the tree moved.
#[test]
fn upgrade_branch_ref_rebuilds_on_change() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[(
        "Makefile",
        "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\tcp tool.sh $(PREFIX)/bin/zzup\n\tchmod +x $(PREFIX)/bin/zzup\n",
    ), (
        "tool.sh",
        "#!/bin/sh\necho one\n",
    )]);

    let transaction = root.transaction();
    let spec = format!("{origin}@main");
    transaction.install(&[spec]).unwrap();
    assert_eq!(transaction.store().enumerate().unwrap().len(), 1);

    // upgrade without upstream changes: same fingerprint, nothing new
    transaction.upgrade(&[]).unwrap();
    assert_eq!(transaction.store().enumerate().unwrap().len(), 1);

    // move the branch and upgrade again: a second artifact appears
    fs::write(Path::new(&origin).join("tool.sh"), "#!/bin/sh\necho two\n").unwrap();
    git(&["add", "-A"], Path::new(&origin));
    git(&["commit", "-m", "update"], Path::new(&origin));

    transaction.upgrade(&[]).unwrap();
    assert_eq!(transaction.store().enumerate().unwrap().len(), 2);
}

/// Interrupted builds leave no partial store entries (P7 at the
/// transaction level: a failing build aborts before publish).
#[test]
fn failed_build_publishes_nothing() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho x\n")]);
    let mut recipe = script_recipe("zzbad", "1.0", &origin, &[]);
    recipe.push_str("build:\n  commands:\n    - exit 9\n");
    root.add_recipe_repo("core", &[("zzbad.yaml", recipe)]);

    let transaction = root.transaction();
    let err = transaction.install(&["zzbad=1.0".to_string()]).unwrap_err();
    assert!(matches!(err, Error::BuildFailed { .. }));

    assert!(transaction.store().enumerate().unwrap().is_empty());
    assert_eq!(transaction.profile().current(), None);
    assert!(state::read(&root.layout().state_file()).unwrap().is_empty());
    // staging contains no leftovers
    let staging_entries: Vec<_> = fs::read_dir(root.layout().staging_dir())
        .unwrap()
        .collect();
    assert!(staging_entries.is_empty());
}

/// Sync rewrites the state file from the live generation.
#[test]
fn sync_reconciles_state_with_profile() {
    let mut root = TestRoot::new();
    let origin = root.add_origin(&[("run.sh", "#!/bin/sh\necho x\n")]);
    root.add_recipe_repo(
        "core",
        &[("zztool.yaml", script_recipe("zztool", "1.0", &origin, &[]))],
    );

    let transaction = root.transaction();
    transaction.install(&["zztool=1.0".to_string()]).unwrap();

    // clobber the state file, then sync it back from the generation
    state::write(
        &root.layout().state_file(),
        &[StateEntry::System {
            pm: "apt".into(),
            name: "curl".into(),
        }],
    )
    .unwrap();

    let merged = transaction.sync().unwrap();
    let keys: Vec<String> = merged.iter().map(|e| e.key()).collect();
    assert!(keys.contains(&"recipe:zztool".to_string()));
    // the system entry survives: it lives outside the store
    assert!(keys.contains(&"system:apt:curl".to_string()));
}
