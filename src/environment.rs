//! Sandbox environments.
//!
//! An environment is a project directory plus the root filesystem under its
//! `.isobox/` directory. The descriptor `.isobox/config.json` is the only
//! record of it: [`Environment::load`] reads it back and nothing else is
//! consulted.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::build::{self, etc::SANDBOX_PATH, users};
use crate::cache::BaseImage;
use crate::common::write_file_with_dirs;
use crate::config::Config;
use crate::error::SandboxError;
use crate::pkg::{Ledger, PackageManager};
use crate::privileged::{ChrootInvocation, Privileged};

/// Sandbox root directory inside a project.
pub const SANDBOX_DIR: &str = ".isobox";

/// Descriptor file inside the sandbox root.
pub const DESCRIPTOR: &str = "config.json";

pub const DEFAULT_SHELL: &str = "bash";

/// Shell used when the configured one is missing from the sandbox.
pub const FALLBACK_SHELL: &str = "sh";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub root: PathBuf,
    pub created: DateTime<Utc>,
    pub isobox_dir: PathBuf,
    pub username: String,
    pub shell: String,
}

/// Summary shown by `isobox status`.
#[derive(Debug, Clone)]
pub struct Status {
    pub root: PathBuf,
    pub sandbox: PathBuf,
    pub created: DateTime<Utc>,
    pub bin_count: usize,
    pub lib_count: usize,
    /// `None` when the ledger cannot be read.
    pub package_count: Option<usize>,
}

impl Environment {
    /// Create a sandbox under `path`, building the base image first if needed.
    pub fn initialize(
        path: &Path,
        shell: Option<&str>,
        config: &Config,
        privileges: &dyn Privileged,
    ) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| SandboxError::io(path, e))?;
        let root = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;

        let username = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .with_context(|| format!("Cannot derive a username from {}", root.display()))?;

        let env = Self {
            isobox_dir: root.join(SANDBOX_DIR),
            root,
            created: Utc::now(),
            username,
            shell: shell.unwrap_or(DEFAULT_SHELL).to_string(),
        };

        let image = BaseImage::from_config(config);
        if image.exists() {
            println!("Using cached base system...");
        } else {
            println!("Building base system (first time only, this will be cached)...");
            image.build(config).context("Failed to build base system")?;
        }

        image
            .extract_into(&env.isobox_dir)
            .context("Failed to extract base system")?;

        build::finalize_root(&env.isobox_dir, &env.username, &env.shell, privileges)?;
        env.save()?;

        Ok(env)
    }

    /// Read the descriptor of the environment rooted at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let root = absolute(path)?;
        let descriptor = root.join(SANDBOX_DIR).join(DESCRIPTOR);

        let data = match fs::read_to_string(&descriptor) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::not_found("environment", root.display().to_string()).into())
            }
            Err(e) => return Err(SandboxError::io(&descriptor, e).into()),
        };

        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", descriptor.display()))
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.isobox_dir.join(DESCRIPTOR)
    }

    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("Failed to serialize environment")?;
        write_file_with_dirs(self.descriptor_path(), data)
    }

    pub fn home(&self) -> String {
        format!("/home/{}", self.username)
    }

    pub fn status(&self) -> Status {
        let count = |dir: &str| {
            fs::read_dir(self.isobox_dir.join(dir))
                .map(|entries| entries.count())
                .unwrap_or(0)
        };

        Status {
            root: self.root.clone(),
            sandbox: self.isobox_dir.clone(),
            created: self.created,
            bin_count: count("bin"),
            lib_count: count("lib"),
            package_count: Ledger::for_root(&self.isobox_dir)
                .load()
                .ok()
                .map(|packages| packages.len()),
        }
    }

    /// Package manager operating on this sandbox's root.
    pub fn package_manager(&self, config: &Config) -> Result<PackageManager> {
        PackageManager::new(&self.isobox_dir, config)
    }

    /// Start an interactive login shell inside the sandbox.
    pub fn enter_shell(&self, privileges: &dyn Privileged) -> Result<()> {
        let mut shell = self.shell.as_str();
        let installed = self.isobox_dir.join("bin").join(shell);
        if fs::symlink_metadata(&installed).is_err() {
            warn!(
                "configured shell '{}' not found, falling back to {}",
                shell, FALLBACK_SHELL
            );
            shell = FALLBACK_SHELL;
        }
        let shell_path = format!("/bin/{}", shell);

        println!("Entering isolated environment as user '{}'...", self.username);
        println!("Root filesystem: {}", self.isobox_dir.display());
        println!("Shell: {}", shell_path);
        println!("Working directory: {}\n", self.home());

        let script = format!("cd {} && exec {} -l", self.home(), shell_path);
        self.run(privileges, &shell_path, script)
    }

    /// Run one command through `/bin/sh -c` inside the sandbox.
    pub fn execute(&self, command: &[String], privileges: &dyn Privileged) -> Result<()> {
        if command.is_empty() {
            bail!("No command given");
        }

        println!(
            "Executing in isolated environment as user '{}': {:?}",
            self.username, command
        );
        let script = format!("cd {} && {}", self.home(), command.join(" "));
        self.run(privileges, "/bin/sh", script)
    }

    fn run(&self, privileges: &dyn Privileged, program: &str, script: String) -> Result<()> {
        let invocation = ChrootInvocation {
            root: self.isobox_dir.clone(),
            uid: users::USER_UID,
            gid: users::USER_GID,
            program: program.to_string(),
            args: vec!["-c".to_string(), script],
            env: self.child_env(),
        };

        match privileges.run_chrooted(&invocation)? {
            0 => Ok(()),
            code => Err(SandboxError::ChildExit { code }.into()),
        }
    }

    /// The complete environment of a sandboxed process.
    fn child_env(&self) -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), SANDBOX_PATH.to_string()),
            ("HOME".to_string(), self.home()),
            ("USER".to_string(), self.username.clone()),
            ("LOGNAME".to_string(), self.username.clone()),
            ("TERM".to_string(), std::env::var("TERM").unwrap_or_default()),
        ]
    }

    /// Delete the sandbox root. The project directory itself is kept.
    pub fn destroy(&self, privileges: &dyn Privileged) -> Result<()> {
        if !self.isobox_dir.exists() {
            return Ok(());
        }

        match fs::remove_dir_all(&self.isobox_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                // Device nodes and chowned files need elevated removal
                privileges
                    .remove_tree(&self.isobox_dir)
                    .with_context(|| format!("Failed to remove {}", self.isobox_dir.display()))
            }
            Err(e) => Err(SandboxError::io(&self.isobox_dir, e).into()),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
