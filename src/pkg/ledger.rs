//! Installed-package ledger at `var/lib/ipkg/installed.json`.
//!
//! There is no cross-process locking: two installers writing the same ledger
//! at once may lose an entry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::archive::PkgInfo;
use crate::common::write_file_with_dirs;

/// Ledger location relative to a sandbox root.
pub const LEDGER_PATH: &str = "var/lib/ipkg/installed.json";

/// One installed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub installed: DateTime<Utc>,
    /// Paths relative to the sandbox root that came from this package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

fn default_version() -> String {
    "latest".to_string()
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            installed: Utc::now(),
            files: None,
        }
    }

    /// Ledger entry for a freshly extracted archive.
    pub fn from_extracted(
        name: impl Into<String>,
        info: Option<PkgInfo>,
        files: Vec<String>,
    ) -> Self {
        let mut package = Self::new(name);
        if let Some(info) = info {
            if let Some(version) = info.version {
                package.version = version;
            }
            package.description = info.description.unwrap_or_default();
        }
        package.files = Some(files);
        package
    }
}

/// Handle on a sandbox's ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(LEDGER_PATH),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger as an empty array if it does not exist.
    pub fn ensure(&self) -> Result<()> {
        if !self.path.exists() {
            write_file_with_dirs(&self.path, "[]").context("create db")?;
        }
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<Package>> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("read db {}", self.path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parse db {}", self.path.display()))
    }

    pub fn save(&self, packages: &[Package]) -> Result<()> {
        let data = serde_json::to_string_pretty(packages).context("marshal db")?;
        write_file_with_dirs(&self.path, data).context("write db")
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|p| p.name == name))
    }

    pub fn get(&self, name: &str) -> Result<Option<Package>> {
        Ok(self.load()?.into_iter().find(|p| p.name == name))
    }

    /// Append a package unless one with the same name is already recorded.
    ///
    /// Returns whether it was added.
    pub fn append(&self, package: Package) -> Result<bool> {
        Ok(self.append_all(vec![package])? == 1)
    }

    /// Append several packages in one write, skipping names already present.
    ///
    /// Returns how many were added.
    pub fn append_all(&self, new: Vec<Package>) -> Result<usize> {
        let mut packages = self.load()?;
        let mut added = 0;
        for package in new {
            if packages.iter().any(|p| p.name == package.name) {
                continue;
            }
            packages.push(package);
            added += 1;
        }
        if added > 0 {
            self.save(&packages)?;
        }
        Ok(added)
    }

    /// Drop the entry for `name`. Returns the removed entry, if any.
    pub fn remove(&self, name: &str) -> Result<Option<Package>> {
        let mut packages = self.load()?;
        let Some(index) = packages.iter().position(|p| p.name == name) else {
            return Ok(None);
        };
        let removed = packages.remove(index);
        self.save(&packages)?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_creates_empty_array() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::for_root(temp.path());
        ledger.ensure().unwrap();
        assert_eq!(fs::read_to_string(ledger.path()).unwrap(), "[]");
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_dedupes_by_name() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::for_root(temp.path());
        ledger.ensure().unwrap();

        assert!(ledger.append(Package::new("zlib")).unwrap());
        assert!(!ledger.append(Package::new("zlib")).unwrap());
        assert_eq!(
            ledger
                .append_all(vec![Package::new("musl"), Package::new("zlib")])
                .unwrap(),
            1
        );
        assert_eq!(ledger.load().unwrap().len(), 2);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::for_root(temp.path());
        ledger.ensure().unwrap();
        ledger.append(Package::new("curl")).unwrap();

        assert!(ledger.remove("curl").unwrap().is_some());
        assert!(ledger.remove("curl").unwrap().is_none());
        assert!(!ledger.contains("curl").unwrap());
    }

    #[test]
    fn test_reads_entries_without_optional_fields() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::for_root(temp.path());
        write_file_with_dirs(
            ledger.path(),
            r#"[{"name": "bash", "installed": "2024-05-01T10:00:00Z"}]"#,
        )
        .unwrap();

        let packages = ledger.load().unwrap();
        assert_eq!(packages[0].version, "latest");
        assert!(packages[0].files.is_none());

        let saved = serde_json::to_string(&packages).unwrap();
        assert!(!saved.contains("description"));
        assert!(!saved.contains("files"));
    }
}
