//! APK archive reading and extraction.
//!
//! An APK is one or more concatenated gzip members holding tar segments:
//! an optional signature, the control segment with `.PKGINFO`, and the
//! payload. Entries whose name starts with `.` are metadata and never land
//! in the target tree.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::warn;

use crate::error::SandboxError;

/// Name of the metadata entry.
pub const PKGINFO: &str = ".PKGINFO";

/// Fields of `.PKGINFO` the installer uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Raw `depend = ` tokens, in file order.
    pub depends: Vec<String>,
}

impl PkgInfo {
    /// Parse `key = value` lines. Unknown keys are ignored.
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(" = ") else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "pkgname" => info.name = Some(value),
                "pkgver" => info.version = Some(value),
                "pkgdesc" => info.description = Some(value),
                "depend" => info.depends.push(value),
                _ => {}
            }
        }
        info
    }
}

/// Outcome of extracting one archive.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Metadata, when the archive carried it.
    pub info: Option<PkgInfo>,
    /// Regular files and symlinks written, relative to the target root.
    pub files: Vec<String>,
}

fn open(path: &Path) -> Result<Archive<MultiGzDecoder<File>>> {
    let file = File::open(path).map_err(|e| SandboxError::io(path, e))?;
    let mut archive = Archive::new(MultiGzDecoder::new(file));
    // Each gzip member ends its tar segment with zero blocks
    archive.set_ignore_zeros(true);
    Ok(archive)
}

/// Read `.PKGINFO` without extracting anything.
pub fn read_pkginfo(path: &Path) -> Result<PkgInfo> {
    let bad = |e: io::Error| SandboxError::archive(path, e);
    let mut archive = open(path)?;

    for entry in archive.entries().map_err(bad)? {
        let mut entry = entry.map_err(bad)?;
        if entry.path().map_err(bad)?.as_os_str() == PKGINFO {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(bad)?;
            return Ok(PkgInfo::parse(&text));
        }
    }

    Err(SandboxError::archive(path, "missing .PKGINFO metadata entry").into())
}

/// Relative path for an entry, or `None` if it would escape the root.
fn sanitize(entry_path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Symlink hops allowed while resolving one path, as in Linux path lookup.
const MAX_LINK_HOPS: usize = 40;

/// Resolve `relative` under `root` the way a chroot at `root` would.
///
/// Every component is looked up with `symlink_metadata`; links are followed
/// with absolute targets restarting at `root` and `..` clamped there. The
/// result always lies inside `root`.
fn resolve_in_root(root: &Path, relative: &Path) -> io::Result<PathBuf> {
    let mut pending: VecDeque<OsString> = link_steps(relative).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(step) = pending.pop_front() {
        if step == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&step);
        let on_disk = root.join(&candidate);
        match fs::symlink_metadata(&on_disk) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::other(format!(
                        "too many levels of symbolic links at {}",
                        candidate.display()
                    )));
                }
                let target = fs::read_link(&on_disk)?;
                if target.is_absolute() {
                    resolved.clear();
                }
                let mut next: VecDeque<OsString> = link_steps(&target).collect();
                next.extend(pending);
                pending = next;
            }
            _ => resolved = candidate,
        }
    }
    Ok(root.join(resolved))
}

fn link_steps(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
    })
}

/// Remove whatever non-directory sits at `path`.
fn clear_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path)
            .with_context(|| format!("Failed to replace {}", path.display())),
        _ => Ok(()),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Extract the payload of `archive_path` into `root`.
pub fn extract(archive_path: &Path, root: &Path) -> Result<Extracted> {
    let bad = |e: io::Error| SandboxError::archive(archive_path, e);
    let mut archive = open(archive_path)?;
    let mut result = Extracted::default();

    for entry in archive.entries().map_err(bad)? {
        let mut entry = entry.map_err(bad)?;
        let entry_path = entry.path().map_err(bad)?.into_owned();

        if entry_path.to_string_lossy().starts_with('.') {
            if entry_path.as_os_str() == PKGINFO {
                let mut text = String::new();
                entry.read_to_string(&mut text).map_err(bad)?;
                result.info = Some(PkgInfo::parse(&text));
            }
            continue;
        }

        let Some(relative) = sanitize(&entry_path) else {
            warn!(
                "refusing entry {} in {}",
                entry_path.display(),
                archive_path.display()
            );
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let Some(file_name) = relative.file_name() else {
            continue;
        };
        let parent = relative.parent().unwrap_or(Path::new(""));
        let target = resolve_in_root(root, parent).map_err(bad)?.join(file_name);
        let mode = entry.header().mode().map_err(bad)? & 0o7777;

        match entry.header().entry_type() {
            EntryType::Directory => {
                if !target.is_dir() {
                    fs::create_dir_all(&target)
                        .with_context(|| format!("Failed to create {}", target.display()))?;
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                        .with_context(|| format!("Failed to chmod {}", target.display()))?;
                }
            }
            EntryType::Regular | EntryType::Continuous => {
                ensure_parent(&target)?;
                clear_path(&target)?;
                let mut out = File::create(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
                io::copy(&mut entry, &mut out).map_err(bad)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                    .with_context(|| format!("Failed to chmod {}", target.display()))?;
                result.files.push(relative.to_string_lossy().into_owned());
            }
            EntryType::Symlink => {
                let link_text = entry
                    .link_name()
                    .map_err(bad)?
                    .ok_or_else(|| SandboxError::archive(archive_path, "symlink without target"))?
                    .into_owned();
                ensure_parent(&target)?;
                clear_path(&target)?;
                symlink(&link_text, &target)
                    .with_context(|| format!("Failed to link {}", target.display()))?;
                result.files.push(relative.to_string_lossy().into_owned());
            }
            _ => {}
        }
    }

    Ok(result)
}
