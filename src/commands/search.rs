// src/commands/search.rs
//! Code-forge search command

use anyhow::Result;
use pygr::forge;

/// Search repositories and print the best matches
pub fn cmd_search(query: &str, limit: usize) -> Result<()> {
    let results = forge::search(query, limit)?;
    if results.is_empty() {
        println!("No results for '{query}'.");
        return Ok(());
    }
    for result in results {
        let description = result.description.as_deref().unwrap_or("");
        println!("{:<40} ★{:<7} {description}", result.full_name, result.stars);
    }
    Ok(())
}
