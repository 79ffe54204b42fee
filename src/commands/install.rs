// src/commands/install.rs
//! Install, uninstall, upgrade and rollback commands

use super::Context;
use anyhow::{bail, Result};
use tracing::info;

/// Install one or more packages
pub fn cmd_install(context: &Context, packages: &[String], from_github: bool) -> Result<()> {
    if packages.is_empty() {
        bail!("nothing to install");
    }
    let transaction = context.transaction_with(from_github)?;
    let generation = transaction.install(packages)?;
    println!("Installed {}. Generation {generation} is now current.", packages.join(", "));
    Ok(())
}

/// Remove packages from the declarative state and republish
pub fn cmd_uninstall(context: &Context, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        bail!("nothing to uninstall");
    }
    let transaction = context.transaction()?;
    let (removed, generation) = transaction.uninstall(packages)?;
    match generation {
        Some(generation) => {
            let names: Vec<String> = removed.iter().map(|e| e.to_string()).collect();
            println!("Removed {}. Generation {generation} is now current.", names.join(", "));
        }
        None => println!("No matching packages installed."),
    }
    Ok(())
}

/// Upgrade named packages, or everything
pub fn cmd_upgrade(context: &Context, packages: &[String]) -> Result<()> {
    let transaction = context.transaction()?;
    let generation = transaction.upgrade(packages)?;
    println!("Upgrade complete. Generation {generation} is now current.");
    Ok(())
}

/// Swap back to the previous generation
pub fn cmd_rollback(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    let restored = transaction.rollback()?;
    info!("rollback complete");
    println!("Rolled back to generation {restored}.");
    Ok(())
}
