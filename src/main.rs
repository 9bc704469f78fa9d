//! flow-sync - Keep a local workspace in step with a remote repository
//!
//! Run with `flow-sync --help` for usage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, bail, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use flow_sync::{
    APP_NAME, Config, Credentials, FsRemote, JsonFileStore, VERSION, WorkingSetCache,
    WorkspaceManager,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Synchronize a local workspace with a remote repository, merging local edits")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Workspace selection shared by most commands
#[derive(Args)]
struct Target {
    /// Repository, e.g. `acme/flows`
    repository: String,

    /// Branch to track
    #[arg(short, long, default_value = "main")]
    branch: String,
}

/// Remote access options for commands that talk to the remote
#[derive(Args)]
struct RemoteArgs {
    /// Directory served as the remote (overrides `remote_root`)
    #[arg(long)]
    remote: Option<PathBuf>,

    /// Access token for the remote
    #[arg(long, env = "FLOWSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl RemoteArgs {
    fn credentials(&self) -> Credentials {
        match &self.token {
            Some(token) => Credentials::token(token.clone()),
            None => Credentials::anonymous(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a workspace from the remote
    Clone {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Pull the latest remote state, merging local edits
    Pull {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        remote: RemoteArgs,

        /// Print the merged text of every conflict
        #[arg(long)]
        show_conflicts: bool,
    },

    /// Show workspace sync status
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// List tracked files
    Files {
        #[command(flatten)]
        target: Target,

        /// Only list files with local edits
        #[arg(long)]
        dirty: bool,
    },

    /// Delete a workspace and its tracked files
    Delete {
        #[command(flatten)]
        target: Target,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("warn").add_directive("flow_sync=info".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Build a manager over the JSON store, serving `remote` (or the configured root)
async fn open_manager(config: &Config, remote: Option<&RemoteArgs>) -> Result<WorkspaceManager> {
    let root = remote
        .and_then(|r| r.remote.clone())
        .or_else(|| config.remote_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let store = JsonFileStore::open(config.store_path()?).await?;
    info!("Using store {}", store.path().display());

    Ok(WorkspaceManager::from_config(
        config,
        Arc::new(FsRemote::new(root)),
        Arc::new(store),
        WorkingSetCache::new(),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;

    // Ensure required directories exist
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Failed to create directories: {}", e);
    }

    match cli.command {
        Commands::Clone { target, remote } => {
            let manager = open_manager(&config, Some(&remote)).await?;
            let workspace = manager
                .clone_workspace(&target.repository, &target.branch, remote.credentials())
                .await?;
            println!(
                "Cloned {} ({} file(s))",
                workspace.key,
                workspace.tracked_file_ids.len()
            );
        }

        Commands::Pull {
            target,
            remote,
            show_conflicts,
        } => {
            let manager = open_manager(&config, Some(&remote)).await?;
            let result = manager
                .pull_latest(&target.repository, &target.branch, remote.credentials())
                .await?;

            println!("{}", result.summary());
            for path in &result.skipped {
                println!("  skipped     {}", path);
            }
            for path in &result.overwritten {
                println!("  overwritten {}", path);
            }
            for conflict in &result.conflicts {
                println!("  conflict    {} ({})", conflict.path(), conflict.reason);
                if show_conflicts {
                    println!("{}", conflict.merged_text);
                }
            }

            if !result.success {
                bail!(
                    "pull failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Commands::Status { target } => {
            let manager = open_manager(&config, None).await?;
            let workspace = manager
                .get_workspace(&target.repository, &target.branch)
                .await?
                .ok_or_else(|| {
                    eyre!(
                        "No workspace for {}@{}. Use '{} clone' first.",
                        target.repository,
                        target.branch,
                        APP_NAME
                    )
                })?;
            let files = manager
                .get_workspace_files(&target.repository, &target.branch)
                .await?;
            let dirty = files.iter().filter(|f| f.dirty).count();

            println!("Workspace:   {}", workspace.key);
            println!("Created:     {}", workspace.created_at.to_rfc3339());
            match workspace.last_synced_at {
                Some(at) => println!("Last synced: {}", at.to_rfc3339()),
                None => println!("Last synced: never"),
            }
            if workspace.cloning {
                println!("State:       clone in progress or interrupted");
            } else if let Some(err) = &workspace.clone_error {
                println!("State:       clone failed ({})", err);
            } else {
                println!("State:       ready");
            }
            println!("Files:       {} tracked, {} with local edits", files.len(), dirty);
        }

        Commands::Files { target, dirty } => {
            let manager = open_manager(&config, None).await?;
            let files = manager
                .get_workspace_files(&target.repository, &target.branch)
                .await?;

            if files.is_empty() {
                println!("  No tracked files.");
                return Ok(());
            }
            for file in files.iter().filter(|f| !dirty || f.dirty) {
                let marker = if file.dirty { "M" } else { " " };
                println!(
                    "  {} {:<10} {} [{}]",
                    marker,
                    file.kind().to_string(),
                    file.path(),
                    &file.content_hash
                );
            }
        }

        Commands::Delete { target } => {
            let manager = open_manager(&config, None).await?;
            if manager
                .delete_workspace(&target.repository, &target.branch)
                .await?
            {
                println!("Deleted {}@{}", target.repository, target.branch);
            } else {
                println!("No workspace for {}@{}", target.repository, target.branch);
            }
        }

        Commands::Config { init } => {
            if init {
                config.save()?;
                println!(
                    "Configuration initialized at {:?}",
                    Config::config_file_path()?
                );
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!("\nConfig file: {:?}", Config::config_file_path()?);
                println!("Data dir: {:?}", Config::data_dir()?);
                println!("Store file: {:?}", config.store_path()?);
            }
        }
    }

    Ok(())
}
