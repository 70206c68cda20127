//! Path containment for extension file access
//!
//! Confines every file-system operation an extension performs to a private
//! sandbox root. The guard defeats both `../`-style traversal and
//! symlink-escape attempts with a two-phase resolve:
//!
//! 1. resolve the input against the root and normalize it lexically
//!    (collapsing `..` and `.` without touching the filesystem), then
//! 2. resolve symlinks through every component that exists — dangling
//!    links included — so only genuinely absent components pass through
//!    lexically and files about to be created still validate.
//!
//! Either way the result must be a descendant of (or equal to) the root,
//! or the operation is refused with a security-tier error.
//!
//! # Concurrency
//!
//! A guard is scoped to one extension's file view. All methods take
//! `&self`; concurrent operations against the same instance may interleave
//! freely. Roots of different extensions never overlap, so no cross-instance
//! locking exists.

mod error;
mod view;

pub use error::SandboxError;
pub use view::SandboxFileView;

use std::io;
use std::path::{Component, Path, PathBuf};

/// Containment checker scoped to one canonicalized sandbox root.
#[derive(Debug, Clone)]
pub struct SandboxPathGuard {
    root: PathBuf,
}

impl SandboxPathGuard {
    /// Create a guard rooted at `root`, creating the directory if needed.
    ///
    /// The root is canonicalized once here and is fixed for the guard's
    /// lifetime; every accepted path resolves to a descendant of it.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|source| SandboxError::Root {
            root: root.to_path_buf(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| SandboxError::Root {
            root: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `path` and return its resolved in-sandbox form.
    ///
    /// Relative paths are resolved against the root. Absolute paths are
    /// accepted only when they already point under the root; anything else
    /// is foreign to this sandbox.
    pub fn guard(&self, path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        let path = path.as_ref();

        // Step 1: reject paths that cannot belong to this sandbox.
        let joined = if path.is_absolute() {
            if !normalize(path).starts_with(&self.root) {
                return Err(SandboxError::ForeignPath {
                    path: path.to_path_buf(),
                });
            }
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        // Step 2: lexical normalization collapses `..` segments; this alone
        // defeats simple traversal strings.
        let normalized = normalize(&joined);

        // Step 3: resolve symlinks through whatever already exists. A
        // not-yet-created target falls back to the normalized path, which
        // must still pass containment.
        let resolved = soft_canonicalize(&normalized).map_err(|source| SandboxError::Io {
            path: normalized.clone(),
            source,
        })?;

        // Step 4: containment.
        if !resolved.starts_with(&self.root) {
            return Err(SandboxError::Violation {
                path: path.to_path_buf(),
                root: self.root.clone(),
                resolved,
            });
        }

        Ok(resolved)
    }
}

/// Collapse `.` and `..` lexically, without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if !matches!(
                    components.last(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Symlink hop budget while resolving a partially-existing path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Canonicalize as far as the filesystem allows.
///
/// If the full path exists it is canonicalized outright. Otherwise the
/// deepest existing ancestor is canonicalized and the tail is re-appended
/// one component at a time: a component that exists as a symlink — a
/// dangling one included — is resolved via its link target and resolution
/// restarts from there. Only components that do not exist at all pass
/// through lexically, so new files remain creatable while no existing link
/// escapes inspection.
fn soft_canonicalize(path: &Path) -> io::Result<PathBuf> {
    soft_canonicalize_inner(path, 0)
}

fn soft_canonicalize_inner(path: &Path, hops: usize) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // Deepest existing ancestor, canonicalized; the rest is tail.
            let mut tail: Vec<std::ffi::OsString> = Vec::new();
            let mut current = path.to_path_buf();
            let base = loop {
                let Some(parent) = current.parent() else {
                    return Ok(path.to_path_buf());
                };
                match current.file_name() {
                    Some(name) => tail.push(name.to_os_string()),
                    None => return Ok(path.to_path_buf()),
                }
                let parent = parent.to_path_buf();
                match parent.canonicalize() {
                    Ok(base) => break base,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        current = parent;
                    }
                    Err(err) => return Err(err),
                }
            };

            let mut out = base;
            let mut hops = hops;
            let segments: Vec<std::ffi::OsString> = tail.into_iter().rev().collect();
            for (index, segment) in segments.iter().enumerate() {
                let candidate = out.join(segment);
                let is_link = std::fs::symlink_metadata(&candidate)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if !is_link {
                    out.push(segment);
                    continue;
                }

                // An existing (possibly dangling) symlink in the tail must
                // be resolved, not re-appended verbatim.
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "too many levels of symbolic links",
                    ));
                }
                let target = std::fs::read_link(&candidate)?;
                let target = if target.is_absolute() {
                    target
                } else {
                    out.join(target)
                };
                let mut rest = normalize(&target);
                for remaining in &segments[index + 1..] {
                    rest.push(remaining);
                }
                return soft_canonicalize_inner(&rest, hops);
            }
            Ok(out)
        }
        Err(err) => Err(err),
    }
}
