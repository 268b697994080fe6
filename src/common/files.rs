//! File helpers with automatic parent directory creation.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories as needed.
///
/// The mode is applied after writing, so it is not subject to the umask.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode {:o} on {}", mode, path.display()))?;
    Ok(())
}

/// Create a uniquely named `<prefix>XXXXXX` directory under `parent`.
///
/// The directory and everything in it is removed when the guard drops.
pub fn scratch_dir(parent: &Path, prefix: &str) -> Result<TempDir> {
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(parent)
        .with_context(|| format!("Failed to create scratch directory in {}", parent.display()))
}

/// Copy a file byte-for-byte and give the copy the source's mode bits.
///
/// Symlinks at `src` are followed; the copy is always a regular file.
pub fn copy_preserving_mode(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    let mode = fs::metadata(src)
        .with_context(|| format!("Failed to read metadata: {}", src.display()))?
        .permissions()
        .mode();
    fs::set_permissions(dst, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions: {}", dst.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_mode_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etc/shadow");
        write_file_mode(&path, "root:!:19000::::::\n", 0o600).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_copy_preserving_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("tool");
        fs::write(&src, b"\x7fELF").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o751)).unwrap();

        let dst = temp.path().join("root/bin/tool");
        copy_preserving_mode(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"\x7fELF");
        assert_eq!(fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o751);
    }

    #[test]
    fn test_scratch_dirs_are_unique_and_removed() {
        let temp = TempDir::new().unwrap();
        let parent = temp.path().join("scratch");

        let first = scratch_dir(&parent, "isobox-bulk-").unwrap();
        let second = scratch_dir(&parent, "isobox-bulk-").unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("isobox-bulk-"));

        drop(first);
        second.close().unwrap();
        assert_eq!(fs::read_dir(&parent).unwrap().count(), 0);
    }
}
