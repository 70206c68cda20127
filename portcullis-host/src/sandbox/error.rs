//! Sandbox-specific error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the path guard and the sandboxed file view.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The resolved path escapes the sandbox root. Security tier: the one
    /// operation aborts, the extension is not torn down.
    #[error("path '{path}' escapes sandbox root '{root}' (resolved to '{resolved}')")]
    Violation {
        path: PathBuf,
        root: PathBuf,
        resolved: PathBuf,
    },

    /// An absolute path that is not addressable inside this sandbox.
    #[error("path '{path}' does not belong to this sandbox")]
    ForeignPath { path: PathBuf },

    /// The file view has been closed.
    #[error("sandbox file view is closed")]
    Closed,

    /// The sandbox root could not be created or canonicalized.
    #[error("sandbox root '{root}' could not be prepared")]
    Root {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An underlying filesystem primitive failed on an in-sandbox path.
    #[error("i/o failure on '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A two-endpoint operation (copy, rename) failed; either endpoint may
    /// be the culprit, so both are named.
    #[error("i/o failure transferring '{from}' to '{to}'")]
    Transfer {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// Whether this error is a containment violation rather than an
    /// ordinary filesystem failure.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Violation { .. } | Self::ForeignPath { .. })
    }
}
