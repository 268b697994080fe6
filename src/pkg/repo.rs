//! Repository directory listings.
//!
//! A repository is a plain HTTP directory index. Package archives are found
//! by scanning its `href="...apk"` anchors.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Anchor targets ending in `.apk`. Captures: 1=filename
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"/]+\.apk)""#).unwrap());

/// All archive filenames linked from a directory listing, in page order.
pub fn parse_listing(html: &str) -> Vec<String> {
    HREF_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

/// Whether `filename` is an archive of exactly `package`.
///
/// The name must be followed by a dash and a version starting with a digit,
/// so `vim` does not match `vim-common-9.0.apk`.
pub fn is_archive_of(filename: &str, package: &str) -> bool {
    let Some(stem) = filename.strip_suffix(".apk") else {
        return false;
    };
    let Some(rest) = stem.strip_prefix(package) else {
        return false;
    };
    let Some(version) = rest.strip_prefix('-') else {
        return false;
    };
    version.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// First archive in `filenames` belonging to `package`.
pub fn find_archive<'a>(filenames: &'a [String], package: &str) -> Option<&'a str> {
    filenames
        .iter()
        .map(String::as_str)
        .find(|f| is_archive_of(f, package))
}

/// Join a repository URL and an archive filename.
pub fn archive_url(repository: &str, filename: &str) -> String {
    if repository.ends_with('/') {
        format!("{}{}", repository, filename)
    } else {
        format!("{}/{}", repository, filename)
    }
}

/// Package name to archive URL, for one install batch.
#[derive(Debug, Default)]
pub struct RepoIndex {
    urls: HashMap<String, String>,
}

impl RepoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a location; a name already present keeps its first URL.
    ///
    /// Returns whether the entry was added.
    pub fn insert(&mut self, name: &str, url: String) -> bool {
        if self.urls.contains_key(name) {
            return false;
        }
        self.urls.insert(name.to_string(), url);
        true
    }

    /// Add every wanted package found in one repository listing.
    pub fn merge_listing(&mut self, repository: &str, filenames: &[String], wanted: &[String]) {
        for name in wanted {
            if let Some(file) = find_archive(filenames, name) {
                self.insert(name, archive_url(repository, file));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><pre>
<a href="../">../</a>
<a href="vim-common-9.0.1568-r0.apk">vim-common-9.0.1568-r0.apk</a>
<a href="vim-9.0.1568-r0.apk">vim-9.0.1568-r0.apk</a>
<a href="zlib-1.2.13-r1.apk">zlib-1.2.13-r1.apk</a>
<a href="APKINDEX.tar.gz">APKINDEX.tar.gz</a>
</pre></body></html>"#;

    #[test]
    fn test_parse_listing() {
        let files = parse_listing(LISTING);
        assert_eq!(
            files,
            vec![
                "vim-common-9.0.1568-r0.apk",
                "vim-9.0.1568-r0.apk",
                "zlib-1.2.13-r1.apk"
            ]
        );
    }

    #[test]
    fn test_strict_name_match() {
        let files = parse_listing(LISTING);
        assert_eq!(find_archive(&files, "vim"), Some("vim-9.0.1568-r0.apk"));
        assert_eq!(
            find_archive(&files, "vim-common"),
            Some("vim-common-9.0.1568-r0.apk")
        );
        assert_eq!(find_archive(&files, "zli"), None);
        assert!(!is_archive_of("py3-pip.apk", "py3"));
    }

    #[test]
    fn test_first_writer_wins() {
        let mut index = RepoIndex::new();
        assert!(index.insert("zlib", "https://main/zlib-1.apk".into()));
        assert!(!index.insert("zlib", "https://community/zlib-2.apk".into()));
        assert_eq!(index.get("zlib"), Some("https://main/zlib-1.apk"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_merge_listing_builds_urls() {
        let mut index = RepoIndex::new();
        let files = parse_listing(LISTING);
        index.merge_listing(
            "http://mirror/main/x86_64/",
            &files,
            &["vim".to_string(), "missing".to_string()],
        );
        assert_eq!(
            index.get("vim"),
            Some("http://mirror/main/x86_64/vim-9.0.1568-r0.apk")
        );
        assert_eq!(index.get("missing"), None);
    }
}
