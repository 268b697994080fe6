//! Shared-library closure for binaries copied from the host.
//!
//! Uses `ldd` to list what each binary needs, then copies those libraries into
//! the sandbox at the same absolute paths. Library symlinks are recreated with
//! their literal link text and the real file behind them is queued as well.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::common::{copy_preserving_mode, write_file_with_dirs};
use crate::process::Cmd;

/// Standard library directories written to `etc/ld.so.conf`.
pub const LD_SO_CONF: &str = "/lib\n/lib64\n/usr/lib\n/usr/lib64\n";

/// Source of a binary's shared-library requirements.
pub trait LinkerQuery {
    /// Absolute paths of the libraries `binary` needs at runtime.
    fn required_libraries(&self, binary: &Path) -> Result<Vec<PathBuf>>;
}

/// Asks the host dynamic linker via `ldd`.
pub struct Ldd;

impl LinkerQuery for Ldd {
    fn required_libraries(&self, binary: &Path) -> Result<Vec<PathBuf>> {
        let result = Cmd::new("ldd").arg_path(binary).run()?;
        Ok(parse_ldd_output(&result.stdout))
    }
}

/// Extract absolute library paths from `ldd` output.
///
/// For the interpreter line (`/lib64/ld-linux-x86-64.so.2 => /usr/lib64/...`)
/// both sides are kept, since binaries hardcode the left-hand path.
pub fn parse_ldd_output(output: &str) -> Vec<PathBuf> {
    let mut libs = Vec::new();

    for line in output.lines().map(str::trim) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(arrow) = parts.iter().position(|p| *p == "=>") {
            let Some(target) = parts.get(arrow + 1) else {
                continue;
            };
            if !target.starts_with('/') {
                continue;
            }
            libs.push(PathBuf::from(target));
            if arrow > 0 && parts[arrow - 1].starts_with('/') && parts[arrow - 1].contains("ld-linux")
            {
                libs.push(PathBuf::from(parts[arrow - 1]));
            }
        } else if let Some(first) = parts.first() {
            if first.starts_with('/') {
                libs.push(PathBuf::from(first));
            }
        }
    }
    libs
}

/// Copies the library closure of everything in `root/bin` into `root`.
pub struct LibraryResolver<'a, Q: LinkerQuery> {
    root: &'a Path,
    linker: Q,
    /// Library paths already handled, both literal and canonical.
    copied: HashSet<PathBuf>,
    processed_binaries: HashSet<PathBuf>,
}

impl<'a, Q: LinkerQuery> LibraryResolver<'a, Q> {
    pub fn new(root: &'a Path, linker: Q) -> Self {
        Self {
            root,
            linker,
            copied: HashSet::new(),
            processed_binaries: HashSet::new(),
        }
    }

    /// Resolve every binary in `root/bin`, then write `etc/ld.so.conf`.
    ///
    /// Returns the number of library paths handled.
    pub fn run(&mut self) -> Result<usize> {
        println!("\nSetting up shared libraries...");

        let bin_dir = self.root.join("bin");
        for entry in fs::read_dir(&bin_dir)
            .with_context(|| format!("read bin dir {}", bin_dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                continue;
            }
            self.resolve_binary(&path);
        }

        println!("  Copied {} shared libraries", self.copied.len());

        write_file_with_dirs(self.root.join("etc/ld.so.conf"), LD_SO_CONF)
            .context("write ld.so.conf")?;
        Ok(self.copied.len())
    }

    fn resolve_binary(&mut self, path: &Path) {
        let real = if path.is_symlink() {
            match fs::canonicalize(path) {
                Ok(real) => real,
                Err(_) => return,
            }
        } else {
            path.to_path_buf()
        };

        if !self.processed_binaries.insert(real.clone()) {
            return;
        }

        // Scripts and static binaries make ldd fail; nothing to copy for them.
        let libs = match self.linker.required_libraries(&real) {
            Ok(libs) => libs,
            Err(e) => {
                debug!("no library list for {}: {:#}", real.display(), e);
                return;
            }
        };

        for lib in libs {
            if let Err(e) = self.copy_library(&lib) {
                warn!("failed to copy {}: {:#}", lib.display(), e);
            }
        }
    }

    /// Copy one library, following its symlink chain with an explicit worklist.
    pub fn copy_library(&mut self, lib: &Path) -> Result<()> {
        let mut pending = vec![lib.to_path_buf()];

        while let Some(current) = pending.pop() {
            if !current.is_absolute() {
                bail!("not an absolute path: {}", current.display());
            }
            if !self.copied.insert(current.clone()) {
                continue;
            }

            let dest = self.root.join(current.strip_prefix("/").unwrap_or(current.as_path()));
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            let meta = fs::symlink_metadata(&current)
                .with_context(|| format!("Failed to stat {}", current.display()))?;

            if meta.file_type().is_symlink() {
                let link_text = fs::read_link(&current)?;
                if dest.symlink_metadata().is_err() {
                    symlink(&link_text, &dest)
                        .with_context(|| format!("Failed to link {}", dest.display()))?;
                }
                match fs::canonicalize(&current) {
                    Ok(real) if real != current => pending.push(real),
                    Ok(_) => {}
                    Err(e) => warn!("cannot resolve {}: {}", current.display(), e),
                }
            } else {
                copy_preserving_mode(&current, &dest)?;
            }
        }
        Ok(())
    }
}
