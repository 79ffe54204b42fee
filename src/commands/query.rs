// src/commands/query.rs
//! Read-only queries: list, path, status, generations

use super::Context;
use anyhow::Result;
use pygr::{db, state};

/// List declarative entries
pub fn cmd_list(context: &Context) -> Result<()> {
    let layout = context.layout()?;
    let entries = state::read(&layout.state_file())?;
    if entries.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

/// Print a shell assignment exposing the current profile's bin directory
pub fn cmd_path(context: &Context) -> Result<()> {
    let layout = context.layout()?;
    let bin = layout.profiles_dir().join("current/bin");
    println!("export PATH=\"{}:$PATH\"", bin.display());
    Ok(())
}

/// Show root, generation and store summary
pub fn cmd_status(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    let layout = transaction.layout();
    let profile = transaction.profile();

    println!("root:       {}", layout.root().display());
    match profile.current() {
        Some(n) => println!("generation: {n} (previous: {})",
            profile.previous().map(|p| p.to_string()).unwrap_or_else(|| "none".into())),
        None => println!("generation: none"),
    }

    let keys = transaction.store().enumerate()?;
    println!("store:      {} artifact(s)", keys.len());
    let indexed = db::store_package_count(transaction.connection())?;
    if indexed != keys.len() as u64 {
        println!("            ({indexed} indexed in the database)");
    }

    let entries = state::read(&layout.state_file())?;
    println!("declared:   {} package(s)", entries.len());
    Ok(())
}

/// List profile generations
pub fn cmd_generations(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    let profile = transaction.profile();
    let current = profile.current();
    let previous = profile.previous();

    let numbers = profile.list()?;
    if numbers.is_empty() {
        println!("No generations.");
        return Ok(());
    }
    for number in numbers {
        let manifest = profile.manifest(number)?;
        let marker = if Some(number) == current {
            " (current)"
        } else if Some(number) == previous {
            " (previous)"
        } else {
            ""
        };
        println!(
            "gen-{number}{marker}  {}  {} entr{}",
            manifest.created.format("%Y-%m-%d %H:%M:%S"),
            manifest.entries.len(),
            if manifest.entries.len() == 1 { "y" } else { "ies" },
        );
    }
    Ok(())
}
