//! Signing-authority resolution
//!
//! An authority is a named, key-pinned identity trusted to sign extension
//! bundles. The verifier resolves the authority a bundle claims through an
//! [`AuthorityDirectory`] and requires the bundle's declared public key to
//! equal the pinned one byte for byte.
//!
//! [`PinnedAuthorityDirectory`] is the provided implementation: an explicit
//! table built at process init. Directories backed by a network or cache
//! implement the same trait; their caching strategy is their own concern,
//! but lookups must be safe for concurrent use.

use std::collections::HashMap;

use thiserror::Error;

/// A named signing identity with its pinned public key.
///
/// Obtained once per verification and treated as immutable for that
/// verification's duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// Authority name as declared in signature manifests.
    pub name: String,

    /// Raw public key bytes (32 bytes for ed25519).
    pub public_key: Vec<u8>,
}

impl Authority {
    /// Create an authority record.
    pub fn new(name: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
        }
    }
}

/// Failure while consulting a directory backend.
///
/// A lookup error means "authority unresolved", never a crash; the verifier
/// maps it to an unverified outcome.
#[derive(Debug, Error)]
#[error("authority directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

/// Resolves authority names to pinned public keys.
pub trait AuthorityDirectory: Send + Sync {
    /// Look up an authority by name. `Ok(None)` means the name is unknown.
    fn fetch(&self, name: &str) -> Result<Option<Authority>, DirectoryError>;
}

/// Statically-built authority table.
#[derive(Debug, Default)]
pub struct PinnedAuthorityDirectory {
    entries: HashMap<String, Vec<u8>>,
}

impl PinnedAuthorityDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a public key for an authority name.
    pub fn pin(mut self, name: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(name.into(), public_key.into());
        self
    }

    /// Number of pinned authorities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AuthorityDirectory for PinnedAuthorityDirectory {
    fn fetch(&self, name: &str) -> Result<Option<Authority>, DirectoryError> {
        Ok(self
            .entries
            .get(name)
            .map(|key| Authority::new(name, key.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_lookup() {
        let directory = PinnedAuthorityDirectory::new().pin("acme-plugins", vec![1u8; 32]);

        let authority = directory.fetch("acme-plugins").unwrap().unwrap();
        assert_eq!(authority.name, "acme-plugins");
        assert_eq!(authority.public_key, vec![1u8; 32]);
    }

    #[test]
    fn test_unknown_name_is_none_not_error() {
        let directory = PinnedAuthorityDirectory::new();
        assert!(directory.fetch("nobody").unwrap().is_none());
    }
}
