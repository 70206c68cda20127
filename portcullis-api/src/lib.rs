//! portcullis-api: Shared types for the portcullis extension gate
//!
//! This crate defines the data carried across the trust boundary: the
//! manifests packaged inside an extension bundle, the [`AccessDecision`]
//! outcome type used by the policy and bytecode layers, and the
//! [`InvalidExtension`] rejection error shared by the signature verifier
//! and the call guard so the host can present one consistent rejection
//! surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entry name of the required plugin manifest inside a bundle.
pub const PLUGIN_MANIFEST_ENTRY: &str = "plugin.manifest";

/// Entry name of the optional signature manifest inside a bundle.
///
/// A bundle without this entry is treated as unsigned, not as invalid.
pub const SIGNATURE_MANIFEST_ENTRY: &str = "signature.manifest";

/// File suffix identifying module entries inside a bundle.
pub const MODULE_SUFFIX: &str = ".wasm";

/// Outcome of a policy or call-site check.
///
/// Denials are ordinary values, never panics or control-flow errors; only
/// the load gate converts a terminal denial into a user-facing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The symbol or call site may be resolved.
    Allowed,
    /// The symbol or call site is refused, with an audit-ready reason.
    Denied {
        /// Human-readable reason, sufficient for audit logging.
        reason: String,
    },
}

impl AccessDecision {
    /// Create a denial with the given reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Returns true if the decision permits the operation.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The denial reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Denied { reason } => Some(reason),
        }
    }
}

/// Hard rejection of an extension bundle.
///
/// Raised for tampered signatures, unreadable manifests, and blacklisted
/// call sites. A hard rejection means the entire extension fails to load;
/// no partial activation is permitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid extension: {reason}")]
pub struct InvalidExtension {
    /// Human-readable reason, sufficient for audit logging.
    pub reason: String,
}

impl InvalidExtension {
    /// Create a rejection with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Required manifest describing the extension itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Extension name, also the key under which the gate tracks it.
    pub name: String,

    /// Extension version (semver).
    #[serde(default)]
    pub version: Option<String>,

    /// Short description for host UI.
    #[serde(default)]
    pub description: Option<String>,

    /// Fully-qualified name of the entry module, if the extension has one.
    #[serde(default)]
    pub entry: Option<String>,
}

impl PluginManifest {
    /// Parse a manifest from raw bundle entry bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize for packaging into a bundle.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// Optional manifest binding every module in a bundle to a signing authority.
///
/// `signatures` maps the lowercase hex sha-256 of a module's fully-qualified
/// name to the base64 signature over that module's raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureManifest {
    /// Name of the authority claimed to have signed this bundle.
    pub authority: String,

    /// Base64 public key the bundle claims for that authority. Must match
    /// the directory's pinned key byte for byte.
    pub public: String,

    /// Per-module signature table: hex module-name hash -> base64 signature.
    pub signatures: BTreeMap<String, String>,
}

impl SignatureManifest {
    /// Parse a manifest from raw bundle entry bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize for packaging into a bundle.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_accessors() {
        assert!(AccessDecision::Allowed.is_allowed());
        assert!(AccessDecision::Allowed.reason().is_none());

        let denied = AccessDecision::denied("matched blacklist");
        assert!(!denied.is_allowed());
        assert_eq!(denied.reason(), Some("matched blacklist"));
    }

    #[test]
    fn test_plugin_manifest_round_trip() {
        let manifest = PluginManifest {
            name: "night-vision".into(),
            version: Some("1.2.0".into()),
            description: None,
            entry: Some("acme.filters.NightVision".into()),
        };

        let bytes = manifest.to_vec().unwrap();
        let parsed = PluginManifest::from_slice(&bytes).unwrap();
        assert_eq!(parsed.name, "night-vision");
        assert_eq!(parsed.entry.as_deref(), Some("acme.filters.NightVision"));
    }

    #[test]
    fn test_plugin_manifest_optional_fields_default() {
        let parsed = PluginManifest::from_slice(br#"{"name":"minimal"}"#).unwrap();
        assert_eq!(parsed.name, "minimal");
        assert!(parsed.version.is_none());
        assert!(parsed.entry.is_none());
    }

    #[test]
    fn test_signature_manifest_parse() {
        let json = br#"{
            "authority": "acme-plugins",
            "public": "AAAA",
            "signatures": { "deadbeef": "c2ln" }
        }"#;
        let parsed = SignatureManifest::from_slice(json).unwrap();
        assert_eq!(parsed.authority, "acme-plugins");
        assert_eq!(parsed.signatures.len(), 1);
    }
}
