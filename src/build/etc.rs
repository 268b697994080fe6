//! Network, shell and release files under `/etc`.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::common::write_file_with_dirs;

/// Search path inside every sandbox.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

const HOSTS: &str = "127.0.0.1\tlocalhost isobox\n\
::1\t\tlocalhost ip6-localhost ip6-loopback\n";

const RESOLV_CONF: &str = "nameserver 8.8.8.8\nnameserver 8.8.4.4\n";

const NSSWITCH: &str = r#"passwd:     files
group:      files
shadow:     files
hosts:      files dns
networks:   files
protocols:  files
services:   files
"#;

const PROMPT: &str = r#"export PS1="(isobox) \u@\h:\w\$ ""#;

fn bashrc_content() -> String {
    format!(
        r#"{prompt}
export PATH={path}

echo "========================================="
echo "   ISOBOX Isolated Environment"
echo "========================================="
echo "You are in a completely isolated Linux"
echo "environment. You CANNOT access the host"
echo "system from here."
echo ""
echo "Packages are managed from the host, in"
echo "the project directory:"
echo "  isobox pkg install <package>"
echo "  isobox pkg remove <package>"
echo "  isobox pkg list"
echo ""
echo "Type 'exit' to leave this environment"
echo "========================================="
echo ""

alias ll='ls -lah'
alias la='ls -A'
alias l='ls -CF'
"#,
        prompt = PROMPT,
        path = SANDBOX_PATH
    )
}

fn profile_content() -> String {
    format!(
        "export PATH={}\n{}\n\nif [ -f /etc/bash.bashrc ]; then\n    . /etc/bash.bashrc\nfi\n",
        SANDBOX_PATH, PROMPT
    )
}

pub fn os_release_content(host_system: &str) -> String {
    format!(
        r#"NAME="ISOBOX ({host})"
PRETTY_NAME="ISOBOX Isolated Environment ({host})"
ID=isobox
VERSION_ID=1.0
HOST_SYSTEM="{host}"
"#,
        host = host_system
    )
}

/// Descriptive name of the system at `os_release`.
///
/// Prefers `PRETTY_NAME`, then `NAME`, then "Unknown".
pub fn host_system_name(os_release: &Path) -> String {
    let Ok(content) = fs::read_to_string(os_release) else {
        return "Unknown".to_string();
    };

    for key in ["PRETTY_NAME=", "NAME="] {
        if let Some(value) = content.lines().find_map(|line| line.strip_prefix(key)) {
            return value.trim_matches('"').to_string();
        }
    }
    "Unknown".to_string()
}

/// Write hosts, resolv.conf, nsswitch.conf, bash.bashrc, profile and os-release.
pub fn create_etc_files(root: &Path) -> Result<()> {
    let etc = root.join("etc");

    write_file_with_dirs(etc.join("hosts"), HOSTS).context("create hosts")?;
    write_file_with_dirs(etc.join("resolv.conf"), RESOLV_CONF).context("create resolv.conf")?;
    write_file_with_dirs(etc.join("nsswitch.conf"), NSSWITCH).context("create nsswitch.conf")?;
    write_file_with_dirs(etc.join("bash.bashrc"), bashrc_content()).context("create bashrc")?;
    write_file_with_dirs(etc.join("profile"), profile_content()).context("create profile")?;

    let host = host_system_name(Path::new("/etc/os-release"));
    write_file_with_dirs(etc.join("os-release"), os_release_content(&host))
        .context("create os-release")?;

    println!("  Created: /etc/hosts, /etc/resolv.conf, /etc/nsswitch.conf");
    println!("  Created: /etc/bash.bashrc, /etc/profile, /etc/os-release");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_host_name_prefers_pretty_name() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("os-release");
        fs::write(&path, "NAME=\"Fedora Linux\"\nPRETTY_NAME=\"Fedora Linux 40\"\n").unwrap();
        assert_eq!(host_system_name(&path), "Fedora Linux 40");
    }

    #[test]
    fn test_host_name_falls_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("os-release");
        fs::write(&path, "ID=void\nNAME=\"Void\"\n").unwrap();
        assert_eq!(host_system_name(&path), "Void");

        assert_eq!(host_system_name(&temp.path().join("missing")), "Unknown");
    }

    #[test]
    fn test_create_etc_files() {
        let temp = TempDir::new().unwrap();
        create_etc_files(temp.path()).unwrap();

        let resolv = fs::read_to_string(temp.path().join("etc/resolv.conf")).unwrap();
        assert!(resolv.contains("nameserver 8.8.8.8"));

        let bashrc = fs::read_to_string(temp.path().join("etc/bash.bashrc")).unwrap();
        assert!(bashrc.contains("(isobox)"));
        assert!(bashrc.contains("isobox pkg install <package>"));
        assert!(!bashrc.contains("\"  isobox install"));

        let nsswitch = fs::read_to_string(temp.path().join("etc/nsswitch.conf")).unwrap();
        assert!(nsswitch.contains("hosts:      files dns"));

        let release = fs::read_to_string(temp.path().join("etc/os-release")).unwrap();
        assert!(release.contains("ID=isobox"));
    }
}
