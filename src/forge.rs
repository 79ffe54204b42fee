// src/forge.rs

//! Code-forge search
//!
//! Queries the GitHub repository search endpoint so `pygr search` can find
//! things worth installing. `GITHUB_TOKEN` raises the rate limit when set.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable carrying an API token
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

const SEARCH_URL: &str = "https://api.github.com/search/repositories";

/// One search hit
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "stargazers_count", default)]
    pub stars: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchResult>,
}

/// Search repositories matching a query, best matches first
pub fn search(query: &str, limit: usize) -> Result<Vec<SearchResult>> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pygr/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::FetchFailed {
            url: SEARCH_URL.into(),
            reason: format!("cannot build HTTP client: {e}"),
        })?;

    let mut request = client
        .get(SEARCH_URL)
        .query(&[("q", query), ("per_page", &limit.to_string())])
        .header("Accept", "application/vnd.github+json");
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        request = request.bearer_auth(token);
    }

    let response = request.send().map_err(|e| Error::FetchFailed {
        url: SEARCH_URL.into(),
        reason: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(Error::FetchFailed {
            url: SEARCH_URL.into(),
            reason: format!("status {}", response.status()),
        });
    }

    let parsed: SearchResponse = response.json().map_err(|e| Error::FetchFailed {
        url: SEARCH_URL.into(),
        reason: format!("invalid response: {e}"),
    })?;
    Ok(parsed.items)
}
