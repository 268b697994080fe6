//! Network access for the package manager.
//!
//! Everything that touches the network goes through [`Transport`], so the
//! installer can run against canned listings and archives in tests.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::SandboxError;

pub trait Transport: Send + Sync + 'static {
    /// Fetch a repository directory listing as text.
    fn fetch_listing(&self, url: &str) -> impl Future<Output = Result<String>> + Send;

    /// Plain single-stream download of `url` to `dest`.
    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Multi-connection download. Fails when no accelerator is available.
    fn download_accelerated(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP transport over reqwest, with `aria2c` as the accelerator.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("isobox/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SandboxError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::network(
                url,
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
            )
            .into());
        }
        Ok(response)
    }
}

impl Transport for HttpTransport {
    async fn fetch_listing(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        Ok(response
            .text()
            .await
            .map_err(|e| SandboxError::network(url, e))?)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.get(url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut writer = tokio::io::BufWriter::new(file);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SandboxError::network(url, e))?
        {
            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", dest.display()))?;
        }

        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", dest.display()))?;
        Ok(())
    }

    async fn download_accelerated(&self, url: &str, dest: &Path) -> Result<()> {
        let aria2c = which::which("aria2c").context("aria2c not available")?;
        let (Some(dir), Some(name)) = (dest.parent(), dest.file_name()) else {
            bail!("invalid download destination {}", dest.display());
        };

        let status = tokio::process::Command::new(aria2c)
            .args(["-x", "4", "-s", "4", "-k", "1M", "--quiet=true", "--allow-overwrite=true"])
            .arg("-d")
            .arg(dir)
            .arg("-o")
            .arg(name)
            .arg(url)
            .status()
            .await
            .context("Failed to run aria2c")?;

        if !status.success() {
            return Err(SandboxError::network(
                url,
                format!("aria2c exited with {}", status.code().unwrap_or(-1)),
            )
            .into());
        }
        Ok(())
    }
}
