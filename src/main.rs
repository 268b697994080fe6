//! Isobox - isolated Linux development environments.
//!
//! Each environment is a chroot root under `<project>/.isobox/`, bootstrapped
//! from a cached base image and extended with Alpine packages.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use isobox::config::Config;
use isobox::error;

mod commands;
mod logger;

#[derive(Parser)]
#[command(name = "isobox")]
#[command(about = "Isolated Linux development environments")]
#[command(
    after_help = "QUICK START:\n  isobox init             Create an environment here\n  isobox enter            Open a shell inside it\n  isobox pkg install vim  Add a package\n  isobox destroy          Remove it"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an isolated environment (default: current directory)
    Init {
        path: Option<PathBuf>,

        /// Login shell inside the environment (default: bash)
        #[arg(long)]
        shell: Option<String>,
    },

    /// Enter the isolated environment shell
    Enter,

    /// Execute a command in the isolated environment
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show environment status
    Status,

    /// Remove the isolated environment
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Manage packages inside the environment
    Pkg {
        #[command(subcommand)]
        action: PkgAction,
    },

    /// Manage the cached base system
    Cache {
        #[command(subcommand)]
        what: CacheTarget,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum PkgAction {
    /// Install a package and its dependencies
    Install { name: String },
    /// Remove a package
    Remove { name: String },
    /// List installed packages
    List,
    /// Show the package repositories
    Update,
}

#[derive(Subcommand)]
enum CacheTarget {
    /// Delete and rebuild the base system archive
    Rebuild,
    /// Delete the base system archive
    Clean,
}

fn main() {
    if let Err(e) = logger::init() {
        eprintln!("Warning: {:#}", e);
    }

    if let Err(e) = run() {
        if let Some(code) = error::child_exit_code(&e) {
            std::process::exit(code);
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Init { path, shell } => {
            let path = path.unwrap_or_else(|| PathBuf::from("."));
            commands::cmd_init(&path, shell.as_deref(), &config)?;
        }

        Commands::Enter => commands::cmd_enter(&base_dir)?,

        Commands::Exec { command } => commands::cmd_exec(&base_dir, &command)?,

        Commands::Status => commands::cmd_status(&base_dir)?,

        Commands::Destroy { yes } => commands::cmd_destroy(&base_dir, yes)?,

        Commands::Pkg { action } => {
            let action = match action {
                PkgAction::Install { name } => commands::pkg::PkgAction::Install(name),
                PkgAction::Remove { name } => commands::pkg::PkgAction::Remove(name),
                PkgAction::List => commands::pkg::PkgAction::List,
                PkgAction::Update => commands::pkg::PkgAction::Update,
            };
            commands::cmd_pkg(&base_dir, action, &config)?;
        }

        Commands::Cache { what } => {
            let target = match what {
                CacheTarget::Rebuild => commands::cache::CacheTarget::Rebuild,
                CacheTarget::Clean => commands::cache::CacheTarget::Clean,
            };
            commands::cmd_cache(target, &config)?;
        }

        Commands::Config => commands::cmd_config(&config)?,
    }

    Ok(())
}
