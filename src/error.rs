//! Error taxonomy for sandbox and package operations.
//!
//! Functions return `anyhow::Result`; failures at well-defined points are
//! raised as a [`SandboxError`] so callers can `downcast_ref` to tell a
//! missing package apart from a broken archive or a refused privilege.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Environment descriptor missing, or a package absent from every repository.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An elevated operation (device node, ownership, root change) failed.
    #[error("privileged operation '{operation}' failed: {reason}")]
    Privilege { operation: String, reason: String },

    #[error("'{operation}' is not supported on this platform")]
    Unsupported { operation: &'static str },

    #[error("network failure for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Malformed or unreadable gzip/tar stream, or missing metadata entry.
    #[error("archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// A sandboxed child exited with a non-zero status.
    #[error("command exited with status {code}")]
    ChildExit { code: i32 },
}

impl SandboxError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn privilege(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Privilege {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Find the [`SandboxError`] anywhere in an error chain.
pub fn find(err: &anyhow::Error) -> Option<&SandboxError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SandboxError>())
}

/// Exit code carried by a failed sandboxed command, if that is what failed.
pub fn child_exit_code(err: &anyhow::Error) -> Option<i32> {
    match find(err) {
        Some(SandboxError::ChildExit { code }) => Some(*code),
        _ => None,
    }
}
