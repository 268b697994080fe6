//! Status command - displays sandbox information.

use anyhow::Result;
use std::path::Path;

use super::load_environment;
use isobox::config::Config;

/// Execute the status command.
pub fn cmd_status(base_dir: &Path) -> Result<()> {
    let env = load_environment(base_dir)?;
    let status = env.status();

    println!("ISOBOX Environment Status");
    println!("=========================\n");
    println!("Project Root: {}", status.root.display());
    println!("Isolated Root: {}", status.sandbox.display());
    println!("Created: {}", status.created.format("%Y-%m-%d %H:%M:%S"));
    println!("Available Commands: {}", status.bin_count);
    println!("Shared Libraries: {}", status.lib_count);
    if let Some(count) = status.package_count {
        println!("Installed Packages: {}", count);
    }

    println!("\nThe host filesystem is not visible from inside the sandbox.");
    println!("\nTo enter:");
    println!("  cd {} && isobox enter", status.root.display());
    Ok(())
}

/// Print the effective configuration.
pub fn cmd_config(config: &Config) -> Result<()> {
    config.print();
    Ok(())
}
