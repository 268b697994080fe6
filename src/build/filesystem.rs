//! Sandbox directory skeleton and device nodes.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::warn;

use crate::privileged::Privileged;

use super::users::{USER_GID, USER_UID};

/// POSIX directory layout of every sandbox root.
pub const SKELETON_DIRS: &[&str] = &[
    "bin",
    "sbin",
    "usr/bin",
    "usr/sbin",
    "usr/local/bin",
    "lib",
    "lib64",
    "usr/lib",
    "usr/lib64",
    "etc",
    "etc/profile.d",
    "dev",
    "proc",
    "sys",
    "tmp",
    "var/lib/ipkg",
    "var/log",
    "var/tmp",
    "var/cache/isobox",
    "mnt",
    "opt",
    "srv",
    "run",
];

/// Character devices every sandbox gets: (name, major, minor).
pub const DEVICE_NODES: &[(&str, u64, u64)] = &[
    ("null", 1, 3),
    ("zero", 1, 5),
    ("random", 1, 8),
    ("urandom", 1, 9),
    ("tty", 5, 0),
];

const DEVICE_MODE: u32 = 0o666;

/// Sticky, world-writable.
pub const TMP_MODE: u32 = 0o1777;

/// Create the directory skeleton under `root`.
pub fn create_skeleton(root: &Path) -> Result<()> {
    for dir in SKELETON_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }
    Ok(())
}

/// Create `root/`, `home/` and the designated user's home directory.
///
/// Ownership of the home directory is handed to the sandbox user through the
/// privilege capability; failure leaves it owned by the caller and is only a
/// warning.
pub fn create_user_dirs(root: &Path, username: &str, privileges: &dyn Privileged) -> Result<()> {
    for dir in ["root", "home"] {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        println!("  Created: .isobox/{}", dir);
    }

    let user_home = root.join("home").join(username);
    fs::create_dir_all(&user_home)
        .with_context(|| format!("Failed to create user home {}", user_home.display()))?;

    if let Err(e) = privileges.chown(&user_home, USER_UID, USER_GID) {
        warn!("failed to set ownership of {}: {:#}", user_home.display(), e);
    }
    println!("  Created: .isobox/home/{}", username);

    Ok(())
}

/// Set `tmp` to mode 1777.
pub fn make_tmp_sticky(root: &Path) -> Result<()> {
    let tmp = root.join("tmp");
    fs::create_dir_all(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(TMP_MODE))
        .with_context(|| format!("Failed to chmod {}", tmp.display()))?;
    Ok(())
}

/// Create the fixed device nodes that do not exist yet.
///
/// Returns how many were created.
pub fn create_device_nodes(root: &Path, privileges: &dyn Privileged) -> Result<usize> {
    let dev_dir = root.join("dev");
    fs::create_dir_all(&dev_dir)
        .with_context(|| format!("Failed to create {}", dev_dir.display()))?;

    let mut created = 0;
    for (name, major, minor) in DEVICE_NODES {
        let path = dev_dir.join(name);
        if path.symlink_metadata().is_ok() {
            continue;
        }
        privileges
            .make_char_device(&path, *major, *minor, DEVICE_MODE)
            .with_context(|| format!("mknod {}", name))?;
        created += 1;
    }

    if created > 0 {
        let names: Vec<String> = DEVICE_NODES
            .iter()
            .map(|(name, _, _)| format!("/dev/{}", name))
            .collect();
        println!("  Created device nodes: {}", names.join(", "));
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privileged::Unsupported;
    use tempfile::TempDir;

    #[test]
    fn test_create_skeleton() {
        let temp = TempDir::new().unwrap();
        create_skeleton(temp.path()).unwrap();

        for dir in ["bin", "usr/local/bin", "var/lib/ipkg", "var/cache/isobox", "srv"] {
            assert!(temp.path().join(dir).is_dir(), "{} missing", dir);
        }
    }

    #[test]
    fn test_tmp_is_sticky() {
        let temp = TempDir::new().unwrap();
        make_tmp_sticky(temp.path()).unwrap();

        let mode = fs::metadata(temp.path().join("tmp"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }

    #[test]
    fn test_existing_device_nodes_are_left_alone() {
        let temp = TempDir::new().unwrap();
        let dev = temp.path().join("dev");
        fs::create_dir_all(&dev).unwrap();
        for (name, _, _) in DEVICE_NODES {
            fs::write(dev.join(name), b"").unwrap();
        }

        // Unsupported would fail on any call; nothing should be attempted.
        let created = create_device_nodes(temp.path(), &Unsupported).unwrap();
        assert_eq!(created, 0);
    }

    #[test]
    fn test_user_dirs_survive_chown_failure() {
        let temp = TempDir::new().unwrap();
        create_user_dirs(temp.path(), "alice", &Unsupported).unwrap();
        assert!(temp.path().join("home/alice").is_dir());
        assert!(temp.path().join("root").is_dir());
    }
}
