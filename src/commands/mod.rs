// src/commands/mod.rs
//! Command handlers for the pygr CLI

mod install;
mod query;
mod repo;
mod search;
mod state;

pub use install::{cmd_install, cmd_rollback, cmd_uninstall, cmd_upgrade};
pub use query::{cmd_generations, cmd_list, cmd_path, cmd_status};
pub use repo::{cmd_repo_add, cmd_repo_list};
pub use search::cmd_search;
pub use state::{cmd_apply, cmd_backup, cmd_export, cmd_import, cmd_sync};

use anyhow::Result;
use pygr::{Layout, SandboxPolicy, Transaction, TransactionOptions};
use std::path::PathBuf;

/// Global options shared by every command
pub struct Context {
    pub root: Option<PathBuf>,
    pub sandbox: bool,
    pub cache_url: Option<String>,
}

impl Context {
    pub fn layout(&self) -> Result<Layout> {
        Ok(Layout::discover(self.root.as_deref())?)
    }

    pub fn transaction(&self) -> Result<Transaction> {
        self.transaction_with(false)
    }

    pub fn transaction_with(&self, from_github: bool) -> Result<Transaction> {
        let sandbox = if self.sandbox {
            SandboxPolicy::default()
        } else {
            SandboxPolicy::disabled()
        };
        Ok(Transaction::open(
            self.layout()?,
            TransactionOptions {
                sandbox,
                cache_url: self.cache_url.clone(),
                from_github,
            },
        )?)
    }
}
