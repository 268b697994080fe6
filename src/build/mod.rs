//! Sandbox filesystem construction.
//!
//! - `filesystem`: directory skeleton, `/tmp` mode, device nodes
//! - `users`: passwd/shadow/group/gshadow
//! - `etc`: network, shell and os-release files
//! - `binaries`: busybox or host utilities, CA bundle
//! - `libdeps`: shared-library closure for host utilities

pub mod binaries;
pub mod etc;
pub mod filesystem;
pub mod libdeps;
pub mod users;

use anyhow::Result;
use std::path::Path;
use tracing::warn;

use crate::privileged::Privileged;

/// Lay out the per-sandbox parts of a root on top of an extracted base image.
///
/// Ownership and device-node failures degrade to warnings.
pub fn finalize_root(
    root: &Path,
    username: &str,
    shell: &str,
    privileges: &dyn Privileged,
) -> Result<()> {
    println!("Creating isolated Linux filesystem...");
    filesystem::create_user_dirs(root, username, privileges)?;
    filesystem::make_tmp_sticky(root)?;

    if let Err(e) = filesystem::create_device_nodes(root, privileges) {
        warn!("failed to create device nodes: {:#}", e);
    }

    println!("\nCreating essential configuration files...");
    users::write_identity_files(root, username, shell)?;
    etc::create_etc_files(root)?;
    println!("  Created: /etc/passwd, /etc/shadow, /etc/group, /etc/gshadow");

    Ok(())
}
