//! Extension bundle access
//!
//! A bundle is the packaged form of an extension: a required
//! `plugin.manifest`, an optional `signature.manifest`, and any number of
//! compiled module entries named `<fully.qualified.Name>.wasm`. Two sources
//! share one entry model: a directory on disk, or an in-memory entry map
//! for bundles arriving over a transport (and for tests).
//!
//! Module enumeration is sorted by entry name, so signature count and match
//! checks over a bundle are deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use portcullis_api::{
    PluginManifest, SignatureManifest, MODULE_SUFFIX, PLUGIN_MANIFEST_ENTRY,
    SIGNATURE_MANIFEST_ENTRY,
};
use thiserror::Error;

/// Errors while reading a bundle or its manifests.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The bundle directory does not exist or is not a directory.
    #[error("bundle directory not found: {0}")]
    NotFound(PathBuf),

    /// The bundle directory could not be enumerated.
    #[error("failed to read bundle directory {path}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bundle entry could not be read.
    #[error("failed to read bundle entry '{entry}'")]
    ReadEntry {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    /// A manifest entry is present but unparseable.
    #[error("malformed manifest entry '{entry}'")]
    Manifest {
        entry: String,
        #[source]
        source: serde_json::Error,
    },

    /// The required plugin manifest entry is absent.
    #[error("bundle has no '{PLUGIN_MANIFEST_ENTRY}' entry")]
    MissingPluginManifest,
}

/// Entry-addressed view of one extension package.
#[derive(Debug, Clone, Default)]
pub struct ExtensionBundle {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ExtensionBundle {
    /// Build a bundle from in-memory entries.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>,
    ) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, bytes)| (name.into(), bytes.into()))
                .collect(),
        }
    }

    /// Read a directory-packaged bundle.
    ///
    /// Only manifest entries and `*.wasm` files at the top level are part of
    /// the bundle; anything else is ignored.
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Self, BundleError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(BundleError::NotFound(path.to_path_buf()));
        }

        let mut entries = BTreeMap::new();
        let listing = std::fs::read_dir(path).map_err(|source| BundleError::ReadDirectory {
            path: path.to_path_buf(),
            source,
        })?;

        for entry in listing {
            let entry = entry.map_err(|source| BundleError::ReadDirectory {
                path: path.to_path_buf(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let relevant = name == PLUGIN_MANIFEST_ENTRY
                || name == SIGNATURE_MANIFEST_ENTRY
                || name.ends_with(MODULE_SUFFIX);
            if !relevant || !entry.path().is_file() {
                continue;
            }
            let bytes =
                std::fs::read(entry.path()).map_err(|source| BundleError::ReadEntry {
                    entry: name.clone(),
                    source,
                })?;
            entries.insert(name, bytes);
        }

        Ok(Self { entries })
    }

    /// Raw bytes of a named entry.
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Whether a named entry exists.
    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Parse the required plugin manifest.
    pub fn plugin_manifest(&self) -> Result<PluginManifest, BundleError> {
        let bytes = self
            .entry(PLUGIN_MANIFEST_ENTRY)
            .ok_or(BundleError::MissingPluginManifest)?;
        PluginManifest::from_slice(bytes).map_err(|source| BundleError::Manifest {
            entry: PLUGIN_MANIFEST_ENTRY.into(),
            source,
        })
    }

    /// Parse the signature manifest, if the bundle carries one.
    pub fn signature_manifest(&self) -> Result<Option<SignatureManifest>, BundleError> {
        match self.entry(SIGNATURE_MANIFEST_ENTRY) {
            None => Ok(None),
            Some(bytes) => SignatureManifest::from_slice(bytes)
                .map(Some)
                .map_err(|source| BundleError::Manifest {
                    entry: SIGNATURE_MANIFEST_ENTRY.into(),
                    source,
                }),
        }
    }

    /// Iterate module entries as `(fully-qualified name, bytes)`, sorted by
    /// entry name.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().filter_map(|(name, bytes)| {
            name.strip_suffix(MODULE_SUFFIX)
                .map(|module| (module, bytes.as_slice()))
        })
    }

    /// Number of module entries in the bundle.
    pub fn module_count(&self) -> usize {
        self.modules().count()
    }
}
