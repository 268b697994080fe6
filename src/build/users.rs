//! Identity files: passwd, shadow, group, gshadow.
//!
//! Every sandbox has exactly three accounts: root, the designated user
//! (uid/gid 1000) and a locked `nobody`. All shadow entries are locked.

use anyhow::{Context, Result};
use std::path::Path;

use crate::common::write_file_mode;

pub const USER_UID: u32 = 1000;
pub const USER_GID: u32 = 1000;
pub const NOBODY_ID: u32 = 65534;

/// Days since epoch stamped as the last password change.
const LAST_CHANGE: u32 = 19000;

pub fn passwd_content(username: &str, shell_path: &str) -> String {
    format!(
        "root:x:0:0:root:/root:/bin/sh\n\
         {user}:x:{uid}:{gid}:{user}:/home/{user}:{shell}\n\
         nobody:x:{nobody}:{nobody}:nobody:/:/bin/false\n",
        user = username,
        uid = USER_UID,
        gid = USER_GID,
        shell = shell_path,
        nobody = NOBODY_ID,
    )
}

pub fn shadow_content(username: &str) -> String {
    ["root", username, "nobody"]
        .iter()
        .map(|name| format!("{}:!:{}:0:99999:7:::\n", name, LAST_CHANGE))
        .collect()
}

pub fn group_content(username: &str) -> String {
    format!(
        "root:x:0:\n{}:x:{}:\nnogroup:x:{}:\n",
        username, USER_GID, NOBODY_ID
    )
}

pub fn gshadow_content(username: &str) -> String {
    ["root", username, "nogroup"]
        .iter()
        .map(|name| format!("{}:!::\n", name))
        .collect()
}

/// Write all four identity files into `root/etc`.
pub fn write_identity_files(root: &Path, username: &str, shell: &str) -> Result<()> {
    let etc = root.join("etc");
    let shell_path = format!("/bin/{}", shell);

    write_file_mode(etc.join("passwd"), passwd_content(username, &shell_path), 0o644)
        .context("create passwd")?;
    write_file_mode(etc.join("shadow"), shadow_content(username), 0o600)
        .context("create shadow")?;
    write_file_mode(etc.join("group"), group_content(username), 0o644)
        .context("create group")?;
    write_file_mode(etc.join("gshadow"), gshadow_content(username), 0o600)
        .context("create gshadow")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_passwd_has_three_accounts() {
        let passwd = passwd_content("dev", "/bin/zsh");
        let lines: Vec<&str> = passwd.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "dev:x:1000:1000:dev:/home/dev:/bin/zsh");
        assert!(lines[2].starts_with("nobody:x:65534:65534:"));
    }

    #[test]
    fn test_shadow_entries_are_locked() {
        for line in shadow_content("dev").lines() {
            let fields: Vec<&str> = line.split(':').collect();
            assert_eq!(fields[1], "!", "{} is not locked", fields[0]);
        }
        for line in gshadow_content("dev").lines() {
            assert!(line.contains(":!:"));
        }
    }

    #[test]
    fn test_write_identity_files_modes() {
        let temp = TempDir::new().unwrap();
        write_identity_files(temp.path(), "dev", "bash").unwrap();

        let shadow_mode = fs::metadata(temp.path().join("etc/shadow"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(shadow_mode & 0o777, 0o600);

        let group = fs::read_to_string(temp.path().join("etc/group")).unwrap();
        assert!(group.contains("dev:x:1000:"));
    }
}
