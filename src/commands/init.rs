//! Init command - creates a sandbox.

use anyhow::Result;
use std::path::Path;

use isobox::config::Config;
use isobox::environment::Environment;
use isobox::privileged::host_privileges;
use isobox::timing::Timer;

/// Execute the init command.
pub fn cmd_init(path: &Path, shell: Option<&str>, config: &Config) -> Result<()> {
    println!("Initializing IsoBox environment in: {}", path.display());

    let timer = Timer::start("Initialize");
    let privileges = host_privileges();
    let env = Environment::initialize(path, shell, config, privileges.as_ref())?;
    timer.finish();

    println!("\nIsoBox environment created successfully!");
    println!("Location: {}", env.root.display());
    println!("\nTo enter the environment, run:");
    println!("  cd {} && isobox enter", path.display());
    Ok(())
}
