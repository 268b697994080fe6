//! Destroy command - removes a sandbox.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;

use super::load_environment;
use isobox::privileged::host_privileges;

/// Execute the destroy command. Without `yes`, asks for a literal `yes`.
pub fn cmd_destroy(base_dir: &Path, yes: bool) -> Result<()> {
    let env = load_environment(base_dir)?;

    if !yes {
        println!(
            "Warning: This will destroy the IsoBox environment at: {}",
            env.root.display()
        );
        print!("Are you sure? (yes/no): ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut response = String::new();
        io::stdin()
            .lock()
            .read_line(&mut response)
            .context("Failed to read confirmation")?;
        if !confirmed(&response) {
            println!("Cancelled");
            return Ok(());
        }
    }

    env.destroy(host_privileges().as_ref())?;
    println!("Environment destroyed successfully");
    Ok(())
}

fn confirmed(response: &str) -> bool {
    response.trim() == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_literal_yes_confirms() {
        assert!(confirmed("yes\n"));
        assert!(!confirmed("y\n"));
        assert!(!confirmed("YES"));
        assert!(!confirmed(""));
    }
}
