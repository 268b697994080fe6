//! Shared test utilities for isobox tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use isobox::config::Config;
use isobox::privileged::{ChrootInvocation, Privileged};
use std::collections::HashMap;
use std::fs;
use std::future::{ready, Future};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

pub const MAIN_REPO: &str = "http://mirror.test/alpine/v3.18/main/x86_64/";
pub const COMMUNITY_REPO: &str = "http://mirror.test/alpine/v3.18/community/x86_64/";

/// Test environment with a sandbox root and a config pointing into the temp dir.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Sandbox root the package manager writes into
    pub rootfs: PathBuf,
    /// Project directory for environment tests
    pub project: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let rootfs = base.join("rootfs");
        let project = base.join("demo");
        fs::create_dir_all(&rootfs).expect("Failed to create rootfs dir");

        let config = Config {
            repositories: vec![MAIN_REPO.to_string(), COMMUNITY_REPO.to_string()],
            base_cache: base.join("cache").join("base-system.tar.gz"),
            scratch_dir: base.join("scratch"),
            download_workers: 4,
            extract_workers: 4,
        };

        Self {
            _temp_dir: temp_dir,
            rootfs,
            project,
            config,
        }
    }
}

/// One entry of a synthetic package archive.
pub enum Entry<'a> {
    Dir(&'a str, u32),
    File(&'a str, &'a [u8], u32),
    Symlink(&'a str, &'a str),
}

/// Build an APK-style gzip+tar stream: `.PKGINFO` first, then the payload.
pub fn build_apk(name: &str, version: &str, depends: &[&str], entries: &[Entry]) -> Vec<u8> {
    let mut pkginfo = format!(
        "# Generated by abuild\npkgname = {}\npkgver = {}\npkgdesc = {} test package\n",
        name, version, name
    );
    for dep in depends {
        pkginfo.push_str(&format!("depend = {}\n", dep));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_file(&mut builder, ".PKGINFO", pkginfo.as_bytes(), 0o644);

    for entry in entries {
        match entry {
            Entry::Dir(path, mode) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(*mode);
                header.set_size(0);
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .expect("append dir");
            }
            Entry::File(path, data, mode) => append_file(&mut builder, path, data, *mode),
            Entry::Symlink(path, target) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder
                    .append_link(&mut header, path, target)
                    .expect("append symlink");
            }
        }
    }

    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

fn append_file(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, path: &str, data: &[u8], mode: u32) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(mode);
    header.set_size(data.len() as u64);
    builder.append_data(&mut header, path, data).expect("append file");
}

/// Minimal package with one binary under `usr/bin`.
pub fn simple_apk(name: &str, depends: &[&str]) -> Vec<u8> {
    let binary = format!("usr/bin/{}", name);
    let contents = format!("#!/bin/sh\necho {}\n", name);
    build_apk(
        name,
        "1.0-r0",
        depends,
        &[
            Entry::Dir("usr/", 0o755),
            Entry::Dir("usr/bin/", 0o755),
            Entry::File(&binary, contents.as_bytes(), 0o755),
        ],
    )
}

/// In-memory repositories with call counters. Accelerated downloads always fail.
#[derive(Default)]
pub struct FakeTransport {
    listings: Mutex<HashMap<String, Vec<String>>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    pub listing_fetches: AtomicUsize,
    pub downloads: AtomicUsize,
    pub accelerated_attempts: AtomicUsize,
    /// URLs passed to plain downloads, in call order.
    pub fetched_urls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.listings.lock().unwrap().insert(MAIN_REPO.to_string(), Vec::new());
        fake.listings
            .lock()
            .unwrap()
            .insert(COMMUNITY_REPO.to_string(), Vec::new());
        fake
    }

    /// URLs of every plain download so far.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched_urls.lock().unwrap().clone()
    }

    /// Publish `bytes` as `<name>-1.0-r0.apk` in `repo`.
    pub fn publish(&self, repo: &str, name: &str, bytes: Vec<u8>) {
        let filename = format!("{}-1.0-r0.apk", name);
        self.listings
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .push(filename.clone());
        self.archives
            .lock()
            .unwrap()
            .insert(format!("{}{}", repo, filename), bytes);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn listing_count(&self) -> usize {
        self.listing_fetches.load(Ordering::SeqCst)
    }

    fn listing_html(&self, url: &str) -> Result<String> {
        let listings = self.listings.lock().unwrap();
        let files = listings
            .get(url)
            .ok_or_else(|| anyhow!("HTTP 404 Not Found: {}", url))?;

        let mut html = String::from("<html><body><pre><a href=\"../\">../</a>\n");
        for file in files {
            html.push_str(&format!("<a href=\"{}\">{}</a>\n", file, file));
        }
        html.push_str("</pre></body></html>\n");
        Ok(html)
    }

    fn write_archive(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 Not Found: {}", url))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
        Ok(())
    }
}

impl isobox::pkg::Transport for FakeTransport {
    fn fetch_listing(&self, url: &str) -> impl Future<Output = Result<String>> + Send {
        self.listing_fetches.fetch_add(1, Ordering::SeqCst);
        ready(self.listing_html(url))
    }

    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = Result<()>> + Send {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.fetched_urls.lock().unwrap().push(url.to_string());
        ready(self.write_archive(url, dest))
    }

    fn download_accelerated(
        &self,
        _url: &str,
        _dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send {
        self.accelerated_attempts.fetch_add(1, Ordering::SeqCst);
        ready(Err(anyhow!("aria2c not available")))
    }
}

/// Privilege adapter that records calls instead of needing root.
///
/// Device nodes become empty regular files so later checks can see them.
pub struct RecordingPrivileges {
    pub devices: Mutex<Vec<(PathBuf, u64, u64, u32)>>,
    pub chowns: Mutex<Vec<(PathBuf, u32, u32)>>,
    pub invocations: Mutex<Vec<ChrootInvocation>>,
    pub exit_code: i32,
}

impl RecordingPrivileges {
    pub fn new() -> Self {
        Self::exiting_with(0)
    }

    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            chowns: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            exit_code,
        }
    }

    pub fn last_invocation(&self) -> Option<ChrootInvocation> {
        self.invocations.lock().unwrap().last().cloned()
    }
}

impl Privileged for RecordingPrivileges {
    fn make_char_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> Result<()> {
        fs::write(path, b"")?;
        self.devices
            .lock()
            .unwrap()
            .push((path.to_path_buf(), major, minor, mode));
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.chowns.lock().unwrap().push((path.to_path_buf(), uid, gid));
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn run_chrooted(&self, invocation: &ChrootInvocation) -> Result<i32> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(self.exit_code)
    }
}

/// Lay out a small root and archive it as the base image in `config`.
pub fn seed_base_image(config: &Config) {
    let staging = config.scratch_dir.join("seed");
    isobox::build::filesystem::create_skeleton(&staging).expect("skeleton");
    fs::write(staging.join("bin/sh"), b"#!/bin/sh\n").expect("write sh");
    fs::write(staging.join("bin/bash"), b"#!/bin/bash\n").expect("write bash");
    fs::write(staging.join("lib/ld-musl-x86_64.so.1"), b"\x7fELF").expect("write loader");

    let image = isobox::cache::BaseImage::from_config(config);
    fs::create_dir_all(image.path().parent().unwrap()).expect("cache dir");
    isobox::cache::pack_archive(&staging, image.path()).expect("pack base image");
    fs::remove_dir_all(&staging).expect("remove staging");
}
