// src/main.rs
//! pygr - CLI entry point

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "pygr")]
#[command(version)]
#[command(about = "Source-building package manager with rollback", long_about = None)]
struct Cli {
    /// Root directory override (default: PYGR_ROOT or the user data dir)
    #[arg(short = 'c', long = "root", global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Sandbox builds (default)
    #[arg(long, global = true, overrides_with = "no_sandbox")]
    sandbox: bool,

    /// Run build commands directly on the host
    #[arg(long, global = true)]
    no_sandbox: bool,

    /// Binary cache base URL (env: PYGR_CACHE_URL)
    #[arg(long, global = true, value_name = "URL")]
    cache: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the code forge for repositories
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Install packages (NAME[CONSTRAINT] or OWNER/REPO[@REF])
    Install {
        packages: Vec<String>,

        /// Skip the system-PM and recipe routes
        #[arg(long)]
        from_github: bool,
    },

    /// Remove packages and republish the profile
    Uninstall { packages: Vec<String> },

    /// List declarative entries
    List,

    /// Print a shell assignment exposing the profile bin directory
    Path,

    /// Reconcile declarative state with the current profile
    Sync,

    /// Install every declarative entry
    Apply,

    /// Show root, generation and store summary
    Status,

    /// Snapshot configuration into backups/
    Backup { label: Option<String> },

    /// List profile generations
    Generations,

    /// Switch back to the previous generation
    Rollback,

    /// Write the declarative state to a file (or stdout)
    Export { file: Option<PathBuf> },

    /// Replace the declarative state from a file
    Import { file: PathBuf },

    /// Upgrade packages (all of them when none are named)
    Upgrade { packages: Vec<String> },

    /// Register a recipe repository
    RepoAdd { name: String, url: String },

    /// List registered recipe repositories
    RepoList,

    /// Generate shell completions
    Completions { shell: Shell },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<pygr::Error>()
                .map(|err| err.exit_code())
                .unwrap_or(2);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let context = commands::Context {
        root: cli.root,
        sandbox: cli.sandbox || !cli.no_sandbox,
        cache_url: cli
            .cache
            .or_else(|| std::env::var("PYGR_CACHE_URL").ok()),
    };

    match cli.command {
        Commands::Search { query, limit } => commands::cmd_search(&query, limit),
        Commands::Install {
            packages,
            from_github,
        } => commands::cmd_install(&context, &packages, from_github),
        Commands::Uninstall { packages } => commands::cmd_uninstall(&context, &packages),
        Commands::List => commands::cmd_list(&context),
        Commands::Path => commands::cmd_path(&context),
        Commands::Sync => commands::cmd_sync(&context),
        Commands::Apply => commands::cmd_apply(&context),
        Commands::Status => commands::cmd_status(&context),
        Commands::Backup { label } => commands::cmd_backup(&context, label.as_deref()),
        Commands::Generations => commands::cmd_generations(&context),
        Commands::Rollback => commands::cmd_rollback(&context),
        Commands::Export { file } => commands::cmd_export(&context, file.as_deref()),
        Commands::Import { file } => commands::cmd_import(&context, &file),
        Commands::Upgrade { packages } => commands::cmd_upgrade(&context, &packages),
        Commands::RepoAdd { name, url } => commands::cmd_repo_add(&context, &name, &url),
        Commands::RepoList => commands::cmd_repo_list(&context),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "pygr", &mut io::stdout());
            Ok(())
        }
    }
}
