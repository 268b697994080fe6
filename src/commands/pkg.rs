//! Pkg command - package management inside a sandbox.

use anyhow::Result;
use std::path::Path;

use super::load_environment;
use isobox::config::Config;
use isobox::pkg::Package;

/// Package subcommand.
pub enum PkgAction {
    Install(String),
    Remove(String),
    List,
    Update,
}

/// Execute a pkg subcommand against the sandbox in `base_dir`.
pub fn cmd_pkg(base_dir: &Path, action: PkgAction, config: &Config) -> Result<()> {
    let env = load_environment(base_dir)?;
    let manager = env.package_manager(config)?;

    match action {
        PkgAction::Install(name) => {
            manager.install(&name)?;
            println!("Successfully installed {}", name);
        }
        PkgAction::Remove(name) => manager.remove(&name)?,
        PkgAction::List => {
            let packages = manager.list()?;
            if packages.is_empty() {
                println!("No packages installed");
                return Ok(());
            }
            println!("Installed packages:");
            for package in &packages {
                println!("  {}", listing_line(package));
            }
        }
        PkgAction::Update => manager.update()?,
    }
    Ok(())
}

/// `name (version) - description`, or without the description when there is none.
fn listing_line(package: &Package) -> String {
    if package.description.is_empty() {
        format!("{} ({})", package.name, package.version)
    } else {
        format!("{} ({}) - {}", package.name, package.version, package.description)
    }
}
