// src/commands/state.rs
//! Declarative-state commands: sync, apply, export, import, backup

use super::Context;
use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use pygr::state;
use std::fs;
use std::path::Path;

/// Reconcile the state file with the current generation
pub fn cmd_sync(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    let entries = transaction.sync()?;
    println!("State synchronized: {} entr{}.", entries.len(),
        if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

/// Install every declarative entry missing from the current generation
pub fn cmd_apply(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    match transaction.apply()? {
        Some(generation) => println!("Applied. Generation {generation} is now current."),
        None => println!("Nothing to do; state already applied."),
    }
    Ok(())
}

/// Write the declarative state to a file, or stdout when none is given
pub fn cmd_export(context: &Context, file: Option<&Path>) -> Result<()> {
    let layout = context.layout()?;
    let entries = state::read(&layout.state_file())?;
    match file {
        Some(path) => {
            state::write(path, &entries)?;
            println!("Exported {} entr{} to {}.", entries.len(),
                if entries.len() == 1 { "y" } else { "ies" }, path.display());
        }
        None => {
            for entry in entries {
                println!("{entry}");
            }
        }
    }
    Ok(())
}

/// Replace the declarative state from a file (validated line by line)
pub fn cmd_import(context: &Context, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("import file {} does not exist", file.display());
    }
    let entries = state::read(file)?;
    let layout = context.layout()?;
    layout.ensure()?;

    let _lock = layout.lock()?;
    state::write(&layout.state_file(), &entries)?;
    println!("Imported {} entr{}. Run 'pygr apply' to install.", entries.len(),
        if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

/// Snapshot the configuration and current manifest into backups/
pub fn cmd_backup(context: &Context, label: Option<&str>) -> Result<()> {
    let transaction = context.transaction()?;
    let layout = transaction.layout();

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let name = match label {
        Some(label) => format!("{stamp}-{label}"),
        None => stamp.to_string(),
    };
    let dest = layout.backups_dir().join(&name);
    fs::create_dir_all(&dest).context("creating backup directory")?;

    let state_file = layout.state_file();
    if state_file.exists() {
        fs::copy(&state_file, dest.join("packages.conf")).context("copying state file")?;
    }
    let profile = transaction.profile();
    if let Some(number) = profile.current() {
        let manifest = layout
            .profiles_dir()
            .join(format!("gen-{number}"))
            .join("manifest");
        if manifest.exists() {
            fs::copy(&manifest, dest.join("manifest")).context("copying generation manifest")?;
        }
    }

    println!("Backup written to {}.", dest.display());
    Ok(())
}
