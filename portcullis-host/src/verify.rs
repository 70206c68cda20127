//! Per-module signature verification
//!
//! Verifies, once per extension package, that every module in a bundle was
//! signed by the authority the bundle claims, and that the claimed
//! authority key matches the pinned key in the
//! [`AuthorityDirectory`](crate::authority::AuthorityDirectory).
//!
//! Signing is per module, not per archive: each module's raw bytes carry
//! their own ed25519 signature, keyed in the table by the sha-256 of the
//! module's fully-qualified name. A single tampered module is detected
//! without invalidating the provenance bookkeeping of unrelated modules,
//! and individual modules can be re-validated later without re-hashing the
//! whole bundle.
//!
//! # Outcomes
//!
//! - Missing `plugin.manifest` or `signature.manifest`, an unknown
//!   authority, or a public-key mismatch with the pinned key produce a
//!   sealed **unverified** result; whether unsigned extensions are admitted
//!   is the gate's policy, not this module's.
//! - Any bad, missing, or unmatched signature, and any count mismatch
//!   between modules and table entries, is a hard [`InvalidExtension`]:
//!   the whole bundle is rejected with no partial effect.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use portcullis_api::{InvalidExtension, SignatureManifest, PLUGIN_MANIFEST_ENTRY};
use sha2::{Digest, Sha256};

use crate::authority::{Authority, AuthorityDirectory};
use crate::bundle::ExtensionBundle;

/// Sealed verification outcome for one extension package.
///
/// Produced once at install time and immutable thereafter; the gate caches
/// it for the extension's lifetime.
#[derive(Debug, Clone)]
pub struct PluginSignature {
    verified: bool,
    authority: Option<Authority>,
    timestamp: DateTime<Utc>,
}

impl PluginSignature {
    /// Whether every module in the bundle validated against the pinned
    /// authority key.
    pub fn verified(&self) -> bool {
        self.verified
    }

    /// The authority that signed the bundle, when verified.
    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    /// When verification completed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Incrementally-built verification state; consumed by [`seal`](Self::seal).
///
/// This is the only mutable form of a verification result and it never
/// leaves this module.
struct PendingSignature {
    authority: Option<Authority>,
    validated: BTreeSet<String>,
}

impl PendingSignature {
    fn unsigned() -> PluginSignature {
        PluginSignature {
            verified: false,
            authority: None,
            timestamp: Utc::now(),
        }
    }

    fn new(authority: Authority) -> Self {
        Self {
            authority: Some(authority),
            validated: BTreeSet::new(),
        }
    }

    fn mark_validated(&mut self, hash: String) {
        self.validated.insert(hash);
    }

    fn seal(self) -> PluginSignature {
        PluginSignature {
            verified: true,
            authority: self.authority,
            timestamp: Utc::now(),
        }
    }
}

/// Stable identifier of a module inside a signature table: lowercase hex
/// sha-256 of the fully-qualified module name.
pub fn module_name_hash(module_name: &str) -> String {
    let digest = Sha256::digest(module_name.as_bytes());
    hex::encode(digest)
}

/// One-shot verifier over an authority directory.
#[derive(Clone)]
pub struct SignatureVerifier {
    directory: Arc<dyn AuthorityDirectory>,
}

impl SignatureVerifier {
    /// Create a verifier resolving authorities through `directory`.
    pub fn new(directory: Arc<dyn AuthorityDirectory>) -> Self {
        Self { directory }
    }

    /// Verify a bundle, producing a sealed [`PluginSignature`].
    ///
    /// All-or-nothing: either every module validates and the result is
    /// `verified`, or the bundle is rejected outright; an unsigned or
    /// unresolvable bundle yields an unverified (not rejected) result.
    pub fn verify(&self, bundle: &ExtensionBundle) -> Result<PluginSignature, InvalidExtension> {
        // Step 1: both manifests must be present for a verifiable bundle.
        if !bundle.has_entry(PLUGIN_MANIFEST_ENTRY) {
            tracing::warn!("bundle lacks plugin manifest, treating as unverified");
            return Ok(PendingSignature::unsigned());
        }
        let manifest = match bundle
            .signature_manifest()
            .map_err(|err| InvalidExtension::new(err.to_string()))?
        {
            Some(manifest) => manifest,
            None => {
                tracing::debug!("bundle carries no signature manifest, unsigned");
                return Ok(PendingSignature::unsigned());
            }
        };

        // Step 2: the declared key must byte-for-byte equal the pinned key
        // for the declared authority name.
        let declared_key = BASE64.decode(manifest.public.as_bytes()).map_err(|err| {
            InvalidExtension::new(format!("undecodable public key in signature manifest: {err}"))
        })?;
        let authority = match self.directory.fetch(&manifest.authority) {
            Ok(Some(authority)) => authority,
            Ok(None) => {
                tracing::warn!(authority = %manifest.authority, "authority unknown to directory");
                return Ok(PendingSignature::unsigned());
            }
            Err(err) => {
                tracing::warn!(authority = %manifest.authority, error = %err, "authority unresolved");
                return Ok(PendingSignature::unsigned());
            }
        };
        if declared_key != authority.public_key {
            // Possible impersonation of a known authority name.
            tracing::warn!(authority = %authority.name, "declared public key differs from pinned key");
            return Ok(PendingSignature::unsigned());
        }

        let key_bytes: [u8; 32] = authority.public_key.as_slice().try_into().map_err(|_| {
            InvalidExtension::new(format!(
                "pinned key for authority '{}' is not a valid ed25519 public key",
                authority.name
            ))
        })?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|err| {
            InvalidExtension::new(format!(
                "pinned key for authority '{}' is not a valid ed25519 public key: {err}",
                authority.name
            ))
        })?;

        // Steps 3-4: validate every module entry against its table entry.
        let mut pending = PendingSignature::new(authority);
        for (module_name, module_bytes) in bundle.modules() {
            let hash = module_name_hash(module_name);
            let encoded = manifest.signatures.get(&hash).ok_or_else(|| {
                InvalidExtension::new(format!("no signature for module '{module_name}'"))
            })?;
            let signature = decode_signature(encoded, module_name)?;
            verifying_key.verify(module_bytes, &signature).map_err(|_| {
                InvalidExtension::new(format!(
                    "signature verification failed for module '{module_name}'"
                ))
            })?;
            pending.mark_validated(hash);
        }

        // Step 5: the table and the bundle must describe the same set of
        // modules; an unmatched table entry means something was removed or
        // renamed after signing.
        check_counts(&manifest, &pending, bundle.module_count())?;

        // Step 6: seal. Nothing before this point is observable outside.
        Ok(pending.seal())
    }
}

fn decode_signature(encoded: &str, module_name: &str) -> Result<Signature, InvalidExtension> {
    let bytes = BASE64.decode(encoded.as_bytes()).map_err(|err| {
        InvalidExtension::new(format!(
            "undecodable signature for module '{module_name}': {err}"
        ))
    })?;
    let bytes: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
        InvalidExtension::new(format!(
            "signature for module '{module_name}' has wrong length"
        ))
    })?;
    Ok(Signature::from_bytes(&bytes))
}

fn check_counts(
    manifest: &SignatureManifest,
    pending: &PendingSignature,
    module_count: usize,
) -> Result<(), InvalidExtension> {
    if manifest.signatures.len() != module_count {
        return Err(InvalidExtension::new(format!(
            "signature table has {} entries for {} module entries",
            manifest.signatures.len(),
            module_count
        )));
    }
    if let Some(stray) = manifest
        .signatures
        .keys()
        .find(|hash| !pending.validated.contains(*hash))
    {
        return Err(InvalidExtension::new(format!(
            "signature table entry '{stray}' matches no module in the bundle"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
