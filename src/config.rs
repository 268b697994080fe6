//! Configuration management for isobox.
//!
//! The core receives a [`Config`] explicitly. [`Config::load`] is used by the
//! CLI: it starts from defaults and applies overrides from a `.env` file and
//! the process environment (environment variables take precedence).

use std::path::{Path, PathBuf};

/// Upstream mirror prefix that `ISOBOX_MIRROR` replaces.
pub const DEFAULT_MIRROR: &str = "https://dl-cdn.alpinelinux.org/alpine";

/// Pinned distribution release. v3.18 still ships APKv2 (plain gzip+tar).
pub const RELEASE: &str = "v3.18";

pub const ARCH: &str = "x86_64";

/// Concurrent workers for the download and extract phases of a bulk install.
pub const DEFAULT_WORKERS: usize = 16;

const CACHE_FILE: &str = "base-system.tar.gz";

/// Isobox configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository directory listings, queried in this priority order.
    pub repositories: Vec<String>,
    /// Cached base image archive.
    pub base_cache: PathBuf,
    /// Where bulk downloads are staged before extraction.
    pub scratch_dir: PathBuf,
    pub download_workers: usize,
    pub extract_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let base_cache = dirs::cache_dir()
            .map(|dir| dir.join("isobox").join(CACHE_FILE))
            .unwrap_or_else(|| PathBuf::from("/tmp/isobox-base-system.tar.gz"));

        Self {
            repositories: repositories_for(DEFAULT_MIRROR),
            base_cache,
            scratch_dir: std::env::temp_dir(),
            download_workers: DEFAULT_WORKERS,
            extract_workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    /// Load configuration from `.env` in `base_dir` and the environment.
    ///
    /// Recognised variables:
    /// - `ISOBOX_CACHE_DIR`: directory holding the base image archive
    /// - `ISOBOX_MIRROR`: replacement for the Alpine CDN prefix
    pub fn load(base_dir: &Path) -> Self {
        // Missing .env is normal
        let _ = dotenvy::from_path(base_dir.join(".env"));

        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ISOBOX_CACHE_DIR") {
            if !dir.trim().is_empty() {
                config.base_cache = PathBuf::from(dir.trim()).join(CACHE_FILE);
            }
        }

        if let Ok(mirror) = std::env::var("ISOBOX_MIRROR") {
            let mirror = mirror.trim();
            if !mirror.is_empty() {
                config.repositories = repositories_for(mirror);
            }
        }

        config
    }

    /// The repository channels as (label, url) pairs, for display.
    pub fn labelled_repositories(&self) -> Vec<(&'static str, &str)> {
        let labels = ["Main", "Community"];
        self.repositories
            .iter()
            .enumerate()
            .map(|(i, url)| (labels.get(i).copied().unwrap_or("Extra"), url.as_str()))
            .collect()
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        for (label, url) in self.labelled_repositories() {
            println!("  {} repository: {}", label, url);
        }
        println!("  Base image cache: {}", self.base_cache.display());
        println!("  Scratch directory: {}", self.scratch_dir.display());
        println!(
            "  Workers: {} download / {} extract",
            self.download_workers, self.extract_workers
        );
    }
}

/// Main and community channel URLs for a mirror prefix.
pub fn repositories_for(mirror: &str) -> Vec<String> {
    let mirror = mirror.trim_end_matches('/');
    ["main", "community"]
        .iter()
        .map(|channel| format!("{}/{}/{}/{}/", mirror, RELEASE, channel, ARCH))
        .collect()
}
