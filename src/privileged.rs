//! Privileged OS operations behind a narrow capability interface.
//!
//! Sandbox construction needs a handful of operations an ordinary user cannot
//! perform: character device creation, ownership changes, removing trees that
//! contain root-owned files, and running a process under a changed root. The
//! rest of the crate only talks to [`Privileged`]; [`host_privileges`] picks
//! the platform adapter.
//!
//! On Linux the adapter performs the syscalls directly when already running as
//! root and goes through `sudo` otherwise. Other platforms get an adapter that
//! refuses every operation with [`SandboxError::Unsupported`].

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;

/// A process to run with its filesystem root changed to `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootInvocation {
    pub root: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment of the child. Nothing else is inherited.
    pub env: Vec<(String, String)>,
}

pub trait Privileged: Send + Sync {
    /// Create a character device node with the given mode.
    fn make_char_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> Result<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Remove a directory tree that may contain files the caller cannot delete.
    fn remove_tree(&self, path: &Path) -> Result<()>;

    /// Run a process under a changed root with stdio passed through.
    ///
    /// Returns the child's exit code (-1 when killed by a signal).
    fn run_chrooted(&self, invocation: &ChrootInvocation) -> Result<i32>;
}

/// The privilege adapter for the current platform.
pub fn host_privileges() -> Box<dyn Privileged> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::HostPrivileges::detect())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(Unsupported)
    }
}

/// Adapter for platforms without chroot/mknod support.
#[derive(Debug, Default)]
pub struct Unsupported;

impl Privileged for Unsupported {
    fn make_char_device(&self, _path: &Path, _major: u64, _minor: u64, _mode: u32) -> Result<()> {
        Err(SandboxError::Unsupported { operation: "mknod" }.into())
    }

    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> Result<()> {
        Err(SandboxError::Unsupported { operation: "chown" }.into())
    }

    fn remove_tree(&self, _path: &Path) -> Result<()> {
        Err(SandboxError::Unsupported {
            operation: "privileged remove",
        }
        .into())
    }

    fn run_chrooted(&self, _invocation: &ChrootInvocation) -> Result<i32> {
        Err(SandboxError::Unsupported { operation: "chroot" }.into())
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    use super::{ChrootInvocation, Privileged};
    use crate::error::SandboxError;
    use crate::process::Cmd;
    use anyhow::Result;
    use nix::sys::stat::{makedev, mknod, Mode, SFlag};
    use nix::unistd::{Gid, Uid};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use std::process::{Command, Stdio};

    /// Linux adapter: direct syscalls as root, `sudo` otherwise.
    #[derive(Debug, Clone, Copy)]
    pub struct HostPrivileges {
        is_root: bool,
    }

    impl HostPrivileges {
        pub fn detect() -> Self {
            Self {
                is_root: nix::unistd::geteuid().is_root(),
            }
        }

        fn sudo(&self, operation: &str, args: &[String]) -> Result<()> {
            Cmd::new("sudo")
                .args(args)
                .run()
                .map_err(|e| SandboxError::privilege(operation, e))?;
            Ok(())
        }
    }

    impl Privileged for HostPrivileges {
        fn make_char_device(&self, path: &Path, major: u64, minor: u64, mode: u32) -> Result<()> {
            if self.is_root {
                mknod(
                    path,
                    SFlag::S_IFCHR,
                    Mode::from_bits_truncate(mode),
                    makedev(major, minor),
                )
                .map_err(|e| SandboxError::privilege("mknod", e))?;
                // mknod honours the umask
                fs::set_permissions(path, fs::Permissions::from_mode(mode))
                    .map_err(|e| SandboxError::io(path, e))?;
                return Ok(());
            }

            self.sudo(
                "mknod",
                &[
                    "mknod".to_string(),
                    "-m".to_string(),
                    format!("{:o}", mode),
                    path.to_string_lossy().into_owned(),
                    "c".to_string(),
                    major.to_string(),
                    minor.to_string(),
                ],
            )
        }

        fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
            if self.is_root {
                nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                    .map_err(|e| SandboxError::privilege("chown", e))?;
                return Ok(());
            }

            self.sudo(
                "chown",
                &[
                    "chown".to_string(),
                    format!("{}:{}", uid, gid),
                    path.to_string_lossy().into_owned(),
                ],
            )
        }

        fn remove_tree(&self, path: &Path) -> Result<()> {
            if self.is_root {
                fs::remove_dir_all(path).map_err(|e| SandboxError::io(path, e))?;
                return Ok(());
            }

            self.sudo(
                "remove",
                &[
                    "rm".to_string(),
                    "-rf".to_string(),
                    path.to_string_lossy().into_owned(),
                ],
            )
        }

        fn run_chrooted(&self, invocation: &ChrootInvocation) -> Result<i32> {
            let status = if self.is_root {
                let root = invocation.root.clone();
                let uid = Uid::from_raw(invocation.uid);
                let gid = Gid::from_raw(invocation.gid);

                let mut cmd = Command::new(&invocation.program);
                cmd.args(&invocation.args)
                    .env_clear()
                    .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());

                // SAFETY: only async-signal-safe syscalls run between fork and exec.
                unsafe {
                    cmd.pre_exec(move || {
                        nix::unistd::chroot(root.as_path())?;
                        nix::unistd::chdir("/")?;
                        nix::unistd::setgroups(&[gid])?;
                        nix::unistd::setgid(gid)?;
                        nix::unistd::setuid(uid)?;
                        Ok(())
                    });
                }

                cmd.status()
                    .map_err(|e| SandboxError::privilege("chroot", e))?
            } else {
                let mut args = vec![
                    "chroot".to_string(),
                    format!("--userspec={}:{}", invocation.uid, invocation.gid),
                    invocation.root.to_string_lossy().into_owned(),
                    invocation.program.clone(),
                ];
                args.extend(invocation.args.iter().cloned());

                Cmd::new("sudo")
                    .args(&args)
                    .clean_env(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .allow_fail()
                    .run_interactive()
                    .map_err(|e| SandboxError::privilege("chroot", e))?
            };

            Ok(status.code().unwrap_or(-1))
        }
    }
}
