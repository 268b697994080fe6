//! Base image cache.
//!
//! The first sandbox pays for a fully provisioned root: skeleton, userland,
//! CA bundle and the bulk package set. The result is archived once and every
//! later sandbox starts by unpacking that archive. Whether the archive exists
//! is the only thing that decides between the two.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

use crate::build::{binaries, filesystem, libdeps};
use crate::common::scratch_dir;
use crate::config::Config;
use crate::pkg::{HttpTransport, PackageManager, Transport};
use crate::process::Cmd;
use crate::timing::timed;

/// TLS tooling, installed first so later fetches inside the sandbox work.
pub const TLS_PACKAGES: &[&str] = &["wget", "ca-certificates"];

/// Runtime libraries and utilities most Alpine packages expect.
pub const BASE_PACKAGES: &[&str] = &[
    "musl", "libgcc", "zlib", "libbz2", "xz-libs", "zstd-libs", "lz4-libs", "libssl3",
    "libcrypto3", "ca-certificates-bundle", "libcurl", "nghttp2-libs", "c-ares", "pcre2",
    "grep", "sed", "gawk", "libidn2", "libunistring", "coreutils", "findutils", "tar", "gzip",
    "file", "diffutils", "patch", "brotli-libs", "libpsl", "libffi", "libuuid", "sqlite-libs",
    "expat", "libxml2", "libxslt", "yaml", "gmp", "mpfr4", "libgomp", "mpc1", "jansson", "jq",
    "libevent", "libarchive", "curl", "pkgconf", "binutils", "make", "tzdata", "attr",
    "libcap", "procps-ng", "util-linux", "less", "which", "nano", "ncurses-terminfo-base",
    "libncursesw", "libformw", "libmenuw", "libpanelw", "readline", "libacl", "libattr",
    "utmps-libs", "s6", "skalibs", "oniguruma", "oniguruma-dev", "luv", "libtermkey",
    "libvterm", "msgpack-c", "tree-sitter", "unibilium", "musl-libintl", "luajit", "libuv",
];

/// Shells and toolchains offered in every sandbox.
pub const SHELL_PACKAGES: &[&str] = &["python3", "gcc", "go", "vim", "bash", "zsh"];

/// The cached base image archive.
#[derive(Debug, Clone)]
pub struct BaseImage {
    path: PathBuf,
}

impl BaseImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.base_cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Delete the archive. Returns whether there was one.
    pub fn remove(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        Ok(true)
    }

    /// Unpack the archive into `dir`, creating it if needed.
    pub fn extract_into(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        if which::which("pigz").is_ok() {
            Cmd::new("tar")
                .arg("--use-compress-program=pigz")
                .arg("-xf")
                .arg_path(&self.path)
                .arg("-C")
                .arg_path(dir)
                .error_msg("extract base system")
                .run()?;
            return Ok(());
        }
        unpack_archive(&self.path, dir)
    }

    /// Archive `dir` as the base image, replacing any previous one.
    pub fn create_from(&self, dir: &Path) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        println!("\nCreating base system tarball...");
        if which::which("pigz").is_ok() {
            Cmd::new("tar")
                .arg("--use-compress-program=pigz")
                .arg("-cf")
                .arg_path(&self.path)
                .arg("-C")
                .arg_path(dir)
                .arg(".")
                .error_msg("create tarball")
                .run()?;
        } else {
            pack_archive(dir, &self.path)?;
        }

        let size_mb = fs::metadata(&self.path)
            .map(|m| m.len() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0);
        println!("Base system cached at: {} ({:.2} MB)", self.path.display(), size_mb);
        Ok(())
    }

    /// Provision a fresh root from the network and archive it.
    pub fn build(&self, config: &Config) -> Result<()> {
        self.build_with(config, Arc::new(HttpTransport::new()?))
    }

    pub fn build_with<T: Transport>(&self, config: &Config, transport: Arc<T>) -> Result<()> {
        let staging = scratch_dir(&config.scratch_dir, "isobox-base-")?;
        let root = staging.path().to_path_buf();

        println!("\nSetting up base system...");
        println!("This will be cached for faster initialization in the future.");

        let result = provision(&root, config, transport)
            .and_then(|()| timed("Archive base system", || self.create_from(&root)));

        if let Err(e) = staging.close() {
            warn!("failed to remove {}: {}", root.display(), e);
        }
        result
    }
}

/// Lay out and populate a complete root at `root`.
fn provision<T: Transport>(root: &Path, config: &Config, transport: Arc<T>) -> Result<()> {
    timed("Skeleton and userland", || install_userland(root))?;
    timed("Package provisioning", || install_packages(root, config, transport))
}

fn install_userland(root: &Path) -> Result<()> {
    filesystem::create_skeleton(root)?;

    println!("\nSetting up POSIX binaries...");
    match binaries::find_multicall() {
        Some(busybox) => binaries::install_multicall(root, &busybox)?,
        None => {
            binaries::copy_host_utilities(root);
            libdeps::LibraryResolver::new(root, libdeps::Ldd).run()?;
        }
    }
    if let Err(e) = binaries::copy_ca_bundle(root) {
        warn!("SSL certificates setup failed: {:#}", e);
    }
    Ok(())
}

/// Package groups in install order. Each group's failure is only a warning.
fn install_packages<T: Transport>(root: &Path, config: &Config, transport: Arc<T>) -> Result<()> {
    let manager = PackageManager::with_transport(root, config, transport)?;

    if let Err(e) = manager.install_bulk(TLS_PACKAGES) {
        warn!("SSL tools setup failed: {:#}", e);
    }
    match manager.install("musl") {
        Ok(()) => println!("  Added musl libc (for Alpine packages)"),
        Err(e) => warn!("musl libc setup failed: {:#}", e),
    }
    if let Err(e) = manager.install_bulk(BASE_PACKAGES) {
        warn!("Alpine base dependencies setup failed: {:#}", e);
    }

    println!("\nSetting up shells (bash, zsh, sh)...");
    if let Err(e) = manager.install_bulk(SHELL_PACKAGES) {
        warn!("shell installation failed: {:#}", e);
    }
    Ok(())
}

/// In-process gzip+tar of `dir`, entries in sorted order, symlinks kept as links.
pub fn pack_archive(dir: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive)
        .with_context(|| format!("Failed to create {}", archive.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} escaped {}", entry.path().display(), dir.display()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        builder
            .append_path_with_name(entry.path(), relative)
            .with_context(|| format!("Failed to archive {}", entry.path().display()))?;
    }

    builder
        .into_inner()
        .context("Failed to finish tar stream")?
        .finish()
        .context("Failed to finish gzip stream")?;
    Ok(())
}

/// In-process gzip+tar unpack, keeping recorded permissions.
pub fn unpack_archive(archive: &Path, dir: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dir)
        .with_context(|| format!("Failed to extract {} to {}", archive.display(), dir.display()))?;
    Ok(())
}
