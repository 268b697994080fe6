//! On-demand package installation into one sandbox root.
//!
//! Installs run depth-first: a package's dependencies are installed and
//! recorded before its own archive is extracted. Each top-level call carries
//! its own [`Resolution`], so independent installs never share state.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use super::archive::{self, PkgInfo};
use super::ledger::{Ledger, Package};
use super::pipeline::{BulkInstaller, BulkReport};
use super::repo::{archive_url, find_archive, parse_listing};
use super::resolve::{normalize_dependency, resolve_alias};
use super::transport::{HttpTransport, Transport};
use crate::config::Config;
use crate::error::SandboxError;

/// Download location for sequential installs, relative to the root.
pub const DOWNLOAD_CACHE: &str = "var/cache/isobox";

/// State scoped to one top-level install.
#[derive(Debug, Default)]
struct Resolution {
    /// Packages on the current resolution path.
    resolving: HashSet<String>,
    /// Repository URL to listed filenames, or the fetch failure.
    listings: HashMap<String, Result<Vec<String>, String>>,
}

pub struct PackageManager<T: Transport = HttpTransport> {
    rootfs: PathBuf,
    config: Config,
    ledger: Ledger,
    transport: Arc<T>,
    runtime: tokio::runtime::Runtime,
}

impl PackageManager<HttpTransport> {
    /// Package manager for `rootfs` talking to the configured repositories.
    pub fn new(rootfs: &Path, config: &Config) -> Result<Self> {
        Self::with_transport(rootfs, config, Arc::new(HttpTransport::new()?))
    }
}

impl<T: Transport> PackageManager<T> {
    pub fn with_transport(rootfs: &Path, config: &Config, transport: Arc<T>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        Ok(Self {
            rootfs: rootfs.to_path_buf(),
            config: config.clone(),
            ledger: Ledger::for_root(rootfs),
            transport,
            runtime,
        })
    }

    /// Install `name` and its dependencies.
    ///
    /// The alias table is applied once. A missing or unfetchable top-level
    /// package fails the call; dependency failures are only logged.
    pub fn install(&self, name: &str) -> Result<()> {
        self.ledger.ensure()?;

        let resolved = resolve_alias(name);
        if resolved != name {
            println!("Installing {} (mapped to: {})...", name, resolved);
        } else {
            println!("Installing {}...", resolved);
        }
        println!("Resolving dependencies...");

        let mut resolution = Resolution::default();
        self.install_with_deps(resolved, &mut resolution)
            .with_context(|| format!("Failed to install {}", resolved))
    }

    fn install_with_deps(&self, name: &str, resolution: &mut Resolution) -> Result<()> {
        // Already on the path: treat as satisfied without checking
        if resolution.resolving.contains(name) {
            return Ok(());
        }
        if self.ledger.contains(name)? {
            return Ok(());
        }

        resolution.resolving.insert(name.to_string());
        let outcome = self.fetch_and_install(name, resolution);
        resolution.resolving.remove(name);
        outcome
    }

    fn fetch_and_install(&self, name: &str, resolution: &mut Resolution) -> Result<()> {
        let url = self.locate(name, resolution)?;

        let cache_dir = self.rootfs.join(DOWNLOAD_CACHE);
        fs::create_dir_all(&cache_dir).map_err(|e| SandboxError::io(&cache_dir, e))?;
        let apk = cache_dir.join(format!("{}.apk", name));

        println!("  Downloading {}...", name);
        self.runtime
            .block_on(self.transport.download(&url, &apk))
            .with_context(|| format!("failed to download {}", name))?;

        let outcome = self.unpack_with_deps(name, &apk, resolution);
        let _ = fs::remove_file(&apk);
        outcome
    }

    fn unpack_with_deps(&self, name: &str, apk: &Path, resolution: &mut Resolution) -> Result<()> {
        let info: PkgInfo = archive::read_pkginfo(apk)
            .with_context(|| format!("failed to parse dependencies for {}", name))?;

        for dep in info.depends.iter().filter_map(|token| normalize_dependency(token)) {
            if let Err(e) = self.install_with_deps(&dep, resolution) {
                warn!("failed to install dependency {} of {}: {:#}", dep, name, e);
            }
        }

        println!("  Installing {}...", name);
        let extracted = archive::extract(apk, &self.rootfs)
            .with_context(|| format!("failed to extract {}", name))?;

        self.ledger
            .append(Package::from_extracted(name, Some(info), extracted.files))?;
        Ok(())
    }

    /// URL of `name` in the first repository that lists it.
    fn locate(&self, name: &str, resolution: &mut Resolution) -> Result<String> {
        let mut fetch_failure = None;

        for repo in &self.config.repositories {
            let listing = resolution.listings.entry(repo.clone()).or_insert_with(|| {
                self.runtime
                    .block_on(self.transport.fetch_listing(repo))
                    .map(|html| parse_listing(&html))
                    .map_err(|e| {
                        warn!("failed to fetch repository index {}: {:#}", repo, e);
                        format!("{:#}", e)
                    })
            });

            match listing {
                Ok(files) => {
                    if let Some(file) = find_archive(files, name) {
                        return Ok(archive_url(repo, file));
                    }
                }
                Err(reason) => fetch_failure = Some((repo.clone(), reason.clone())),
            }
        }

        match fetch_failure {
            Some((repo, reason)) => Err(SandboxError::network(repo, reason).into()),
            None => Err(SandboxError::not_found("package", name).into()),
        }
    }

    /// Remove `name` and the files it installed.
    ///
    /// Removing a package that is not installed is not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        println!("Removing package: {}", name);
        self.ledger.ensure()?;

        let Some(package) = self.ledger.get(name)? else {
            println!("Package {} is not installed", name);
            return Ok(());
        };

        for file in package.files.iter().flatten() {
            let path = self.rootfs.join(file);
            let is_dir = fs::symlink_metadata(&path).map(|m| m.is_dir()).unwrap_or(true);
            if is_dir {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }

        self.ledger.remove(name)?;
        println!("Successfully removed {}", name);
        Ok(())
    }

    /// Installed packages in install order.
    pub fn list(&self) -> Result<Vec<Package>> {
        self.ledger.ensure()?;
        self.ledger.load()
    }

    /// Show the repositories in use. No index is cached, so nothing is refreshed.
    pub fn update(&self) -> Result<()> {
        println!("Updating package index...");
        for (label, url) in self.config.labelled_repositories() {
            println!("{} repository: {}", label, url);
        }
        println!("Package index updated");
        Ok(())
    }

    /// Install a known package set through the concurrent pipeline.
    pub fn install_bulk(&self, names: &[&str]) -> Result<BulkReport> {
        BulkInstaller::new(&self.rootfs, &self.config, Arc::clone(&self.transport)).run(names)
    }
}
