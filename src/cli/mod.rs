//! Command-line interface for boardsync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::github::GitHubStore;
use crate::output::OutputOptions;
use crate::storage::Storage;
use crate::sync::SyncEngine;

mod init;
mod push;
mod status;
mod sync;
mod validate;

/// boardsync - keep a GitHub Projects board and local task files in step
///
/// Pull board items into markdown files, edit them locally, and push the
/// changes back.
#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Board root holding .boardsync.toml (defaults to current directory)
    #[arg(long, global = true, env = "BOARDSYNC_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .boardsync.toml and the board directories
    Init {
        /// Repository owner (user or organization)
        #[arg(long)]
        owner: Option<String>,

        /// Repository name
        #[arg(long)]
        repo: Option<String>,

        /// Project number, as shown in the project URL
        #[arg(long)]
        project: Option<u64>,
    },

    /// Pull remote board items into local task files
    Sync {
        /// Fetch filter: *, is:open, is:closed, label:<name>, status:<name>
        /// (repeatable, OR'd; defaults to sync.filters)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Let the remote win every difference and restore deleted files
        #[arg(long)]
        force: bool,
    },

    /// Push local changes to the remote board
    Push {
        /// Task files to push (defaults to the whole board)
        files: Vec<PathBuf>,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Close remote issues for deleted files marked close_on_github
        #[arg(short, long)]
        yes: bool,
    },

    /// Show local and remote changes since the last sync
    Status,

    /// Check configuration, credentials and the remote board setup
    Validate,
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn run(self) -> Result<i32> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init {
                owner,
                repo,
                project,
            } => init::run(init::InitOptions {
                root: self.root,
                owner,
                repo,
                project,
                output,
            }),
            Commands::Sync {
                filters,
                dry_run,
                force,
            } => sync::run(sync::SyncOptions {
                root: self.root,
                filters,
                dry_run,
                force,
                output,
            }),
            Commands::Push {
                files,
                dry_run,
                yes,
            } => push::run(push::PushOptions {
                root: self.root,
                files,
                dry_run,
                yes,
                output,
            }),
            Commands::Status => status::run(self.root, output),
            Commands::Validate => validate::run(self.root, output),
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

/// Storage and config of an initialized board
fn open_board(root: Option<PathBuf>) -> Result<(Storage, Config)> {
    let root = resolve_root(root)?;
    let config_path = root.join(CONFIG_FILE);
    if !config_path.exists() {
        return Err(Error::NotInitialized(root));
    }
    let config = Config::load(&config_path)?;
    let storage = Storage::new(root, &config.board.tasks_dir);
    storage.init_all()?;
    Ok((storage, config))
}

/// Engine against the configured GitHub project
fn github_engine(root: Option<PathBuf>) -> Result<SyncEngine<GitHubStore>> {
    let (storage, config) = open_board(root)?;
    let store = GitHubStore::from_config(&config)?;
    Ok(SyncEngine::for_board(store, storage, config))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
}

/// Run a pass, letting Ctrl-C stop it after the current item
fn run_pass<S, T, F, Fut>(engine: &SyncEngine<S>, pass: F) -> Result<T>
where
    S: crate::remote::RemoteIssueStore,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let runtime = runtime()?;
    let cancel = engine.cancel_flag();
    runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current item");
                cancel.store(true, Ordering::SeqCst);
            }
        });
        pass().await
    })
}
