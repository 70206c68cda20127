//! Sandboxed file view handed out to extensions
//!
//! Every path-accepting operation goes through the
//! [`SandboxPathGuard`](super::SandboxPathGuard) before any filesystem
//! primitive executes. The view closes idempotently: `close()` (or drop)
//! may run any number of times, from shutdown hooks included, and only the
//! first call takes effect.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};

use super::{SandboxError, SandboxPathGuard};

/// Guarded file-system surface for one extension.
pub struct SandboxFileView {
    extension: String,
    guard: SandboxPathGuard,
    audit: Arc<dyn AuditSink>,
    closed: AtomicBool,
}

impl SandboxFileView {
    /// Open a view for `extension` rooted at `root`.
    pub fn new(extension: impl Into<String>, root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        Self::with_audit(extension, root, Arc::new(TracingAuditSink))
    }

    /// Open a view reporting violations to the given sink.
    pub fn with_audit(
        extension: impl Into<String>,
        root: impl AsRef<Path>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, SandboxError> {
        let extension = extension.into();
        let guard = SandboxPathGuard::new(root)?;
        audit.record(&AuditEvent::new(AuditKind::FileViewOpened, &extension));
        Ok(Self {
            extension,
            guard,
            audit,
            closed: AtomicBool::new(false),
        })
    }

    /// The canonical sandbox root of this view.
    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    /// Extension this view belongs to.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether the path exists inside the sandbox.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool, SandboxError> {
        let resolved = self.checked(path)?;
        Ok(resolved.exists())
    }

    /// Read a file's contents.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, SandboxError> {
        let resolved = self.checked(path)?;
        std::fs::read(&resolved).map_err(|source| SandboxError::Io {
            path: resolved,
            source,
        })
    }

    /// Write (create or truncate) a file.
    pub fn write(&self, path: impl AsRef<Path>, contents: &[u8]) -> Result<(), SandboxError> {
        let resolved = self.checked(path)?;
        std::fs::write(&resolved, contents).map_err(|source| SandboxError::Io {
            path: resolved,
            source,
        })
    }

    /// Create an empty file; fails if it already exists.
    pub fn create(&self, path: impl AsRef<Path>) -> Result<(), SandboxError> {
        let resolved = self.checked(path)?;
        std::fs::File::create_new(&resolved)
            .map(|_| ())
            .map_err(|source| SandboxError::Io {
                path: resolved,
                source,
            })
    }

    /// Remove a file or an empty directory.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<(), SandboxError> {
        let resolved = self.checked(path)?;
        let result = if resolved.is_dir() {
            std::fs::remove_dir(&resolved)
        } else {
            std::fs::remove_file(&resolved)
        };
        result.map_err(|source| SandboxError::Io {
            path: resolved,
            source,
        })
    }

    /// Copy a file inside the sandbox; both endpoints are guarded.
    pub fn copy(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<u64, SandboxError> {
        let from = self.checked(from)?;
        let to = self.checked(to)?;
        std::fs::copy(&from, &to).map_err(|source| SandboxError::Transfer { from, to, source })
    }

    /// Move a file inside the sandbox; both endpoints are guarded.
    pub fn rename(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<(), SandboxError> {
        let from = self.checked(from)?;
        let to = self.checked(to)?;
        std::fs::rename(&from, &to).map_err(|source| SandboxError::Transfer { from, to, source })
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: impl AsRef<Path>) -> Result<(), SandboxError> {
        let resolved = self.checked(path)?;
        std::fs::create_dir_all(&resolved).map_err(|source| SandboxError::Io {
            path: resolved,
            source,
        })
    }

    /// Close the view. Idempotent; returns true only for the call that
    /// actually performed the close.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.audit
                .record(&AuditEvent::new(AuditKind::FileViewClosed, &self.extension));
        }
        first
    }

    /// Whether the view has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn checked(&self, path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        if self.is_closed() {
            return Err(SandboxError::Closed);
        }
        match self.guard.guard(path.as_ref()) {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                if err.is_security_violation() {
                    self.audit.record(
                        &AuditEvent::new(AuditKind::SandboxViolation, &self.extension)
                            .with_reason(err.to_string()),
                    );
                }
                Err(err)
            }
        }
    }
}

impl Drop for SandboxFileView {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SandboxFileView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxFileView")
            .field("extension", &self.extension)
            .field("root", &self.guard.root())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;

    fn view_with_sink(dir: &Path) -> (SandboxFileView, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let view = SandboxFileView::with_audit("test-ext", dir, sink.clone()).unwrap();
        (view, sink)
    }

    #[test]
    fn test_basic_file_operations_confined() {
        let dir = tempfile::tempdir().unwrap();
        let (view, _) = view_with_sink(dir.path());

        view.mkdir("data").unwrap();
        view.write("data/a.txt", b"hello").unwrap();
        assert!(view.exists("data/a.txt").unwrap());
        assert_eq!(view.read("data/a.txt").unwrap(), b"hello");

        view.copy("data/a.txt", "data/b.txt").unwrap();
        view.rename("data/b.txt", "data/c.txt").unwrap();
        assert!(!view.exists("data/b.txt").unwrap());
        assert!(view.exists("data/c.txt").unwrap());

        view.remove("data/c.txt").unwrap();
        view.remove("data/a.txt").unwrap();
        view.remove("data").unwrap();
        assert!(!view.exists("data").unwrap());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (view, _) = view_with_sink(dir.path());

        view.create("once.txt").unwrap();
        assert!(matches!(
            view.create("once.txt"),
            Err(SandboxError::Io { .. })
        ));
    }

    #[test]
    fn test_escape_attempt_aborts_only_that_operation() {
        let dir = tempfile::tempdir().unwrap();
        let (view, sink) = view_with_sink(dir.path());

        let err = view.write("../../etc/passwd", b"x").unwrap_err();
        assert!(err.is_security_violation());

        // The violation is audited and the view keeps working.
        assert!(sink
            .events()
            .iter()
            .any(|e| e.kind == AuditKind::SandboxViolation));
        view.write("fine.txt", b"still alive").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_dangling_symlink_rejected() {
        // A dangling link inside the root aimed at a nonexistent file
        // outside it: write and create must refuse, and nothing may appear
        // at the link target.
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (view, sink) = view_with_sink(dir.path());

        let target = outside.path().join("payload.txt");
        std::os::unix::fs::symlink(&target, view.root().join("evil")).unwrap();

        let err = view.write("evil", b"pwned").unwrap_err();
        assert!(err.is_security_violation());
        let err = view.create("evil").unwrap_err();
        assert!(err.is_security_violation());

        assert!(!target.exists());
        assert!(sink
            .events()
            .iter()
            .any(|e| e.kind == AuditKind::SandboxViolation));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_symlinked_directory_rejected() {
        // The intermediate component resolves outside the root even though
        // the leaf does not exist yet.
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (view, _) = view_with_sink(dir.path());

        std::os::unix::fs::symlink(outside.path(), view.root().join("tunnel")).unwrap();

        let err = view.write("tunnel/new.txt", b"pwned").unwrap_err();
        assert!(err.is_security_violation());
        assert!(!outside.path().join("new.txt").exists());
    }

    #[test]
    fn test_transfer_failure_names_both_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (view, _) = view_with_sink(dir.path());

        view.write("src.txt", b"payload").unwrap();
        // Destination directory does not exist, so the copy primitive
        // fails on the `to` endpoint.
        let err = view.copy("src.txt", "missing-dir/dst.txt").unwrap_err();
        assert!(matches!(err, SandboxError::Transfer { .. }));
        let message = err.to_string();
        assert!(message.contains("src.txt"), "{message}");
        assert!(message.contains("dst.txt"), "{message}");
    }

    #[test]
    fn test_copy_guards_both_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (view, _) = view_with_sink(dir.path());

        view.write("src.txt", b"payload").unwrap();
        let err = view.copy("src.txt", "../loot.txt").unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (view, sink) = view_with_sink(dir.path());

        assert!(view.close());
        assert!(!view.close());
        assert!(!view.close());

        assert!(matches!(view.exists("x"), Err(SandboxError::Closed)));

        let closes = sink
            .events()
            .iter()
            .filter(|e| e.kind == AuditKind::FileViewClosed)
            .count();
        assert_eq!(closes, 1);
    }
}
