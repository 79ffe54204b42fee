// src/commands/repo.rs
//! Recipe repository commands

use super::Context;
use anyhow::Result;

/// Register and clone a recipe repository
pub fn cmd_repo_add(context: &Context, name: &str, url: &str) -> Result<()> {
    let transaction = context.transaction()?;
    transaction.catalog().add_repo(name, url)?;
    println!("Repository '{name}' added.");
    Ok(())
}

/// List registered repositories in registration order
pub fn cmd_repo_list(context: &Context) -> Result<()> {
    let transaction = context.transaction()?;
    let repos = transaction.catalog().list_repos()?;
    if repos.is_empty() {
        println!("No repositories registered.");
        return Ok(());
    }
    for repo in repos {
        println!("{}: {}", repo.name, repo.url);
    }
    Ok(())
}
