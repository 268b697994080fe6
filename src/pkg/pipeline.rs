//! Concurrent bulk install, used to provision the base image.
//!
//! Three phases: one index task per repository, a fixed pool of download
//! workers fed from a bounded queue, then a fixed pool of extract workers.
//! Every requested name yields exactly one download result. Scratch files are
//! removed after each extraction attempt whether it succeeded or not.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::archive::{self, Extracted};
use super::ledger::{Ledger, Package};
use super::repo::{parse_listing, RepoIndex};
use super::transport::Transport;
use crate::common::scratch_dir;
use crate::config::Config;

/// Counts from one bulk run. `found >= downloaded >= extracted`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Distinct names not already installed.
    pub requested: usize,
    pub found: usize,
    pub downloaded: usize,
    pub extracted: usize,
    /// Names that were not found, not downloaded or not extracted.
    pub failed: Vec<String>,
}

#[derive(Debug)]
struct DownloadJob {
    name: String,
    url: String,
}

#[derive(Debug)]
struct DownloadResult {
    name: String,
    /// Scratch file, when the download succeeded.
    path: Option<PathBuf>,
}

pub struct BulkInstaller<T: Transport> {
    root: PathBuf,
    repositories: Vec<String>,
    scratch_dir: PathBuf,
    download_workers: usize,
    extract_workers: usize,
    transport: Arc<T>,
}

impl<T: Transport> BulkInstaller<T> {
    pub fn new(root: &Path, config: &Config, transport: Arc<T>) -> Self {
        Self {
            root: root.to_path_buf(),
            repositories: config.repositories.clone(),
            scratch_dir: config.scratch_dir.clone(),
            download_workers: config.download_workers.max(1),
            extract_workers: config.extract_workers.max(1),
            transport,
        }
    }

    /// Install `names` on a dedicated multi-threaded runtime.
    pub fn run(&self, names: &[&str]) -> Result<BulkReport> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        rt.block_on(self.run_async(names))
    }

    pub async fn run_async(&self, names: &[&str]) -> Result<BulkReport> {
        let ledger = Ledger::for_root(&self.root);
        ledger.ensure()?;
        let installed: HashSet<String> = ledger.load()?.into_iter().map(|p| p.name).collect();

        let mut seen = HashSet::new();
        let wanted: Vec<String> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty() && !installed.contains(*n))
            .filter(|n| seen.insert(n.to_string()))
            .map(str::to_string)
            .collect();

        let mut report = BulkReport {
            requested: wanted.len(),
            ..BulkReport::default()
        };
        if wanted.is_empty() {
            return Ok(report);
        }

        println!("  Building package index...");
        let index = self.build_index(&wanted).await;
        report.found = wanted.iter().filter(|n| index.get(n).is_some()).count();

        println!("  Installing {} packages...", wanted.len());
        let scratch = scratch_dir(&self.scratch_dir, "isobox-bulk-")?;
        let downloaded = self
            .download_all(&wanted, &index, scratch.path(), &mut report)
            .await;
        report.downloaded = downloaded.len();

        let packages = self.extract_all(downloaded, &mut report).await;
        report.extracted = packages.len();
        if let Err(e) = scratch.close() {
            warn!("failed to remove scratch directory: {}", e);
        }
        ledger.append_all(packages)?;

        println!("  Added {} Alpine packages", report.extracted);
        Ok(report)
    }

    async fn build_index(&self, wanted: &[String]) -> RepoIndex {
        let index = Arc::new(Mutex::new(RepoIndex::new()));
        let wanted = Arc::new(wanted.to_vec());

        let mut tasks = JoinSet::new();
        for repo in &self.repositories {
            let repo = repo.clone();
            let transport = Arc::clone(&self.transport);
            let index = Arc::clone(&index);
            let wanted = Arc::clone(&wanted);
            tasks.spawn(async move {
                match transport.fetch_listing(&repo).await {
                    Ok(html) => {
                        let files = parse_listing(&html);
                        index.lock().await.merge_listing(&repo, &files, &wanted);
                    }
                    Err(e) => warn!("failed to fetch repository index {}: {:#}", repo, e),
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("index task failed: {}", e);
            }
        }

        let mut guard = index.lock().await;
        std::mem::take(&mut *guard)
    }

    async fn download_all(
        &self,
        wanted: &[String],
        index: &RepoIndex,
        scratch: &Path,
        report: &mut BulkReport,
    ) -> Vec<(String, PathBuf)> {
        let total = wanted.len();
        let (job_tx, job_rx) = mpsc::channel::<DownloadJob>(self.download_workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<DownloadResult>(total);

        let mut pool = JoinSet::new();
        for _ in 0..self.download_workers {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let transport = Arc::clone(&self.transport);
            let scratch = scratch.to_path_buf();
            pool.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(job) = next else { break };
                    let path = fetch_one(transport.as_ref(), &job, &scratch).await;
                    let result = DownloadResult {
                        name: job.name,
                        path,
                    };
                    if results.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }

        let mut jobs = Vec::new();
        for name in wanted {
            match index.get(name) {
                Some(url) => jobs.push(DownloadJob {
                    name: name.clone(),
                    url: url.to_string(),
                }),
                None => {
                    warn!("package {} not found in any repository", name);
                    let missing = DownloadResult {
                        name: name.clone(),
                        path: None,
                    };
                    // Capacity covers every name, so this cannot block
                    let _ = result_tx.send(missing).await;
                }
            }
        }
        drop(result_tx);

        let feeder = tokio::spawn(async move {
            for job in jobs {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let bar = phase_bar(total, "Downloading");
        let mut downloaded = Vec::new();
        while let Some(result) = result_rx.recv().await {
            match result.path {
                Some(path) => downloaded.push((result.name, path)),
                None => report.failed.push(result.name),
            }
            bar.inc(1);
        }
        bar.finish();

        if let Err(e) = feeder.await {
            warn!("download queue failed: {}", e);
        }
        while pool.join_next().await.is_some() {}

        downloaded
    }

    async fn extract_all(
        &self,
        downloaded: Vec<(String, PathBuf)>,
        report: &mut BulkReport,
    ) -> Vec<Package> {
        let total = downloaded.len();
        if total == 0 {
            return Vec::new();
        }

        let (job_tx, job_rx) = mpsc::channel::<(String, PathBuf)>(self.extract_workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(String, Option<Extracted>)>(total);

        let mut pool = JoinSet::new();
        for _ in 0..self.extract_workers {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let root = self.root.clone();
            pool.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some((name, path)) = next else { break };

                    let target = root.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        let outcome = archive::extract(&path, &target);
                        let _ = std::fs::remove_file(&path);
                        outcome
                    })
                    .await;

                    let extracted = match outcome {
                        Ok(Ok(extracted)) => Some(extracted),
                        Ok(Err(e)) => {
                            warn!("failed to extract {}: {:#}", name, e);
                            None
                        }
                        Err(e) => {
                            warn!("extract task for {} failed: {}", name, e);
                            None
                        }
                    };
                    if results.send((name, extracted)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let feeder = tokio::spawn(async move {
            for job in downloaded {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let bar = phase_bar(total, "Extracting");
        let mut packages = Vec::new();
        while let Some((name, extracted)) = result_rx.recv().await {
            match extracted {
                Some(extracted) => {
                    packages.push(Package::from_extracted(name, extracted.info, extracted.files))
                }
                None => report.failed.push(name),
            }
            bar.inc(1);
        }
        bar.finish();

        if let Err(e) = feeder.await {
            warn!("extract queue failed: {}", e);
        }
        while pool.join_next().await.is_some() {}

        packages
    }
}

/// Download one archive into the run's scratch directory, accelerated first.
///
/// Names are distinct within a run, so `<name>.apk` cannot collide.
async fn fetch_one<T: Transport>(transport: &T, job: &DownloadJob, scratch: &Path) -> Option<PathBuf> {
    let dest = scratch.join(format!("{}.apk", job.name));

    match transport.download_accelerated(&job.url, &dest).await {
        Ok(()) => return Some(dest),
        Err(e) => debug!("accelerated download of {} failed: {:#}", job.name, e),
    }

    match transport.download(&job.url, &dest).await {
        Ok(()) => Some(dest),
        Err(e) => {
            warn!("failed to download {}: {:#}", job.name, e);
            let _ = tokio::fs::remove_file(&dest).await;
            None
        }
    }
}

fn phase_bar(total: usize, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("  {msg}: [{bar:40}] {pos}/{len}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(label.to_string());
    bar
}
