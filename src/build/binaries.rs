//! POSIX userland for the base image.
//!
//! Preferred source is a host busybox: one binary plus applet symlinks. When
//! the host has none, individual utilities from a fixed allow-list are copied
//! from the host search path and the library closure is filled in afterwards.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::common::copy_preserving_mode;
use crate::process::Cmd;

/// Utilities copied from the host when no multicall binary exists.
pub const ESSENTIAL_UTILITIES: &[&str] = &[
    "sh", "bash", "dash", "ls", "cat", "cp", "mv", "rm", "mkdir", "touch", "chmod", "chown",
    "grep", "sed", "awk", "cut", "sort", "uniq", "head", "tail", "echo", "printf", "test",
    "find", "which", "whereis", "file", "pwd", "cd", "env", "tar", "gzip", "gunzip", "bzip2",
    "xz", "wget", "curl", "ps", "top", "kill", "mount", "umount",
];

const BUSYBOX_LOCATIONS: &[&str] = &[
    "/usr/bin/busybox",
    "/bin/busybox",
    "/usr/local/bin/busybox",
];

/// Host CA bundle locations, in preference order.
pub const CA_BUNDLE_LOCATIONS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Locate a host busybox.
pub fn find_multicall() -> Option<PathBuf> {
    BUSYBOX_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| which::which("busybox").ok())
}

/// Copy busybox into `root/bin` and install its applets as symlinks.
pub fn install_multicall(root: &Path, busybox: &Path) -> Result<()> {
    println!("Found BusyBox at: {}", busybox.display());

    let bin_dir = root.join("bin");
    let dest = bin_dir.join("busybox");
    copy_preserving_mode(busybox, &dest).context("copy busybox")?;
    fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", dest.display()))?;

    Cmd::new("./busybox")
        .args(["--install", "-s", "."])
        .dir(&bin_dir)
        .error_msg("install busybox applets")
        .run()?;

    let rewritten = relativize_applet_links(&bin_dir).context("fix applet symlinks")?;
    println!("  Installed BusyBox ({} applet links)", rewritten);
    Ok(())
}

/// Point every applet symlink with an absolute target at `busybox` instead.
///
/// `--install -s` records the host path, which does not exist once the
/// directory is the filesystem root. Returns how many links were rewritten.
pub fn relativize_applet_links(bin_dir: &Path) -> Result<usize> {
    let mut rewritten = 0;

    for entry in fs::read_dir(bin_dir)
        .with_context(|| format!("Failed to read {}", bin_dir.display()))?
    {
        let entry = entry?;
        if entry.file_name() == "busybox" {
            continue;
        }

        let path = entry.path();
        let Ok(target) = fs::read_link(&path) else {
            continue;
        };
        if target.is_absolute() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            symlink("busybox", &path)
                .with_context(|| format!("Failed to link {}", path.display()))?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Copy every allow-listed utility found on the host search path into `root/bin`.
///
/// Absent utilities are skipped. Returns how many were copied.
pub fn copy_host_utilities(root: &Path) -> usize {
    println!("BusyBox not found, copying essential system binaries...");

    let bin_dir = root.join("bin");
    let mut copied = 0;
    for name in ESSENTIAL_UTILITIES {
        let Ok(host_path) = which::which(name) else {
            continue;
        };
        if let Err(e) = copy_preserving_mode(&host_path, &bin_dir.join(name)) {
            warn!("failed to copy {}: {:#}", name, e);
            continue;
        }
        copied += 1;
    }

    println!("  Copied {} essential binaries", copied);
    copied
}

/// Copy the first host CA bundle found to the two paths TLS clients look at.
pub fn copy_ca_bundle(root: &Path) -> Result<()> {
    copy_ca_bundle_from(root, CA_BUNDLE_LOCATIONS)
}

pub fn copy_ca_bundle_from(root: &Path, candidates: &[&str]) -> Result<()> {
    let source = candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .context("no CA certificates found")?;

    copy_preserving_mode(source, &root.join("etc/ssl/certs/ca-certificates.crt"))?;
    copy_preserving_mode(source, &root.join("etc/ssl/cert.pem"))?;
    println!("  Added SSL certificates");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relativize_applet_links() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path();
        fs::write(bin.join("busybox"), b"").unwrap();
        symlink("/usr/bin/busybox", bin.join("ls")).unwrap();
        symlink("busybox", bin.join("cat")).unwrap();

        let rewritten = relativize_applet_links(bin).unwrap();
        assert_eq!(rewritten, 1);
        assert_eq!(fs::read_link(bin.join("ls")).unwrap(), Path::new("busybox"));
        assert_eq!(fs::read_link(bin.join("cat")).unwrap(), Path::new("busybox"));
    }

    #[test]
    fn test_ca_bundle_copied_to_both_locations() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("bundle.pem");
        fs::write(&bundle, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let root = temp.path().join("root");
        let candidates = ["/nonexistent/ca.pem", bundle.to_str().unwrap()];
        copy_ca_bundle_from(&root, &candidates).unwrap();

        assert!(root.join("etc/ssl/certs/ca-certificates.crt").exists());
        assert!(root.join("etc/ssl/cert.pem").exists());
    }

    #[test]
    fn test_missing_ca_bundle_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(copy_ca_bundle_from(temp.path(), &["/nonexistent/ca.pem"]).is_err());
    }
}
