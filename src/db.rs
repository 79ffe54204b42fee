// src/db.rs

//! Metadata database
//!
//! A small sqlite index beside the store. The filesystem layout stays the
//! source of truth; the database only accelerates listing and status
//! queries and records repository registration order.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Schema, applied idempotently on open
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS repos (
    name TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    path TEXT NOT NULL,
    last_refresh TEXT
);
CREATE TABLE IF NOT EXISTS store_packages (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    path TEXT NOT NULL,
    created TEXT NOT NULL
);
";

/// A registered recipe repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub name: String,
    pub url: String,
    pub path: String,
    pub last_refresh: Option<String>,
}

/// An indexed store artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub key: String,
    pub name: String,
    pub version: String,
    pub path: String,
    pub created: String,
}

/// Open (and initialize) the metadata database
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Register a recipe repository
pub fn insert_repo(conn: &Connection, record: &RepoRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO repos (name, url, path, last_refresh) VALUES (?1, ?2, ?3, ?4)",
        params![record.name, record.url, record.path, record.last_refresh],
    )?;
    Ok(())
}

/// Look up one repository by name
pub fn get_repo(conn: &Connection, name: &str) -> Result<Option<RepoRecord>> {
    let record = conn
        .query_row(
            "SELECT name, url, path, last_refresh FROM repos WHERE name = ?1",
            params![name],
            |row| {
                Ok(RepoRecord {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    path: row.get(2)?,
                    last_refresh: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// All repositories in registration (insertion) order
pub fn list_repos(conn: &Connection) -> Result<Vec<RepoRecord>> {
    let mut stmt =
        conn.prepare("SELECT name, url, path, last_refresh FROM repos ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok(RepoRecord {
            name: row.get(0)?,
            url: row.get(1)?,
            path: row.get(2)?,
            last_refresh: row.get(3)?,
        })
    })?;
    let mut repos = Vec::new();
    for row in rows {
        repos.push(row?);
    }
    Ok(repos)
}

/// Record a repository refresh time
pub fn touch_repo(conn: &Connection, name: &str, when: &str) -> Result<()> {
    conn.execute(
        "UPDATE repos SET last_refresh = ?2 WHERE name = ?1",
        params![name, when],
    )?;
    Ok(())
}

/// Index a store artifact; replacing an existing key is a no-op in effect
/// because content-addressed keys never change meaning
pub fn insert_store_package(conn: &Connection, record: &StoreRecord) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO store_packages (key, name, version, path, created)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.key,
            record.name,
            record.version,
            record.path,
            record.created
        ],
    )?;
    Ok(())
}

/// Look up an indexed artifact by store key
pub fn get_store_package(conn: &Connection, key: &str) -> Result<Option<StoreRecord>> {
    let record = conn
        .query_row(
            "SELECT key, name, version, path, created FROM store_packages WHERE key = ?1",
            params![key],
            |row| {
                Ok(StoreRecord {
                    key: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    path: row.get(3)?,
                    created: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Count of indexed store artifacts
pub fn store_package_count(conn: &Connection) -> Result<u64> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM store_packages", [], |row| row.get(0))?;
    Ok(count)
}
