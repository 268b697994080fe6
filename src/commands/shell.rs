//! Enter and exec commands.
//!
//! A non-zero exit inside the sandbox comes back as `SandboxError::ChildExit`;
//! `main` turns it into the process exit status.

use anyhow::Result;
use std::path::Path;

use super::load_environment;
use isobox::privileged::host_privileges;

pub fn cmd_enter(base_dir: &Path) -> Result<()> {
    let env = load_environment(base_dir)?;
    env.enter_shell(host_privileges().as_ref())
}

pub fn cmd_exec(base_dir: &Path, command: &[String]) -> Result<()> {
    let env = load_environment(base_dir)?;
    env.execute(command, host_privileges().as_ref())
}
