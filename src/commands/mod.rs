//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `init` - Create a sandbox
//! - `shell` - Enter or run a command in a sandbox
//! - `status` - Show sandbox and configuration details
//! - `destroy` - Remove a sandbox
//! - `pkg` - Package management inside a sandbox
//! - `cache` - Base image cache management

pub mod cache;
pub mod destroy;
pub mod init;
pub mod pkg;
mod shell;
mod status;

pub use cache::cmd_cache;
pub use destroy::cmd_destroy;
pub use init::cmd_init;
pub use pkg::cmd_pkg;
pub use shell::{cmd_enter, cmd_exec};
pub use status::{cmd_config, cmd_status};

use anyhow::{Context, Result};
use std::path::Path;

use isobox::environment::Environment;

/// Load the environment in `base_dir`, with a hint when there is none.
pub(crate) fn load_environment(base_dir: &Path) -> Result<Environment> {
    Environment::load(base_dir).context("Run 'isobox init' first to create an environment")
}
