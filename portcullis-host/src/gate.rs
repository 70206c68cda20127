//! Extension load gate
//!
//! Composition root of the trust boundary. For each candidate extension the
//! gate runs signature verification once at install time, consults the name
//! policy and the bytecode call guard on every class-load request, and
//! hands out a sandboxed file view per extension.
//!
//! Error tiers, per decision:
//!
//! - advisory: [`AccessDecision::Denied`] from a symbol lookup — the lookup
//!   fails, the extension keeps running degraded;
//! - hard: [`InvalidExtension`] — the whole extension is refused, no
//!   partial activation;
//! - security: [`SandboxError`] on one file operation — that operation
//!   aborts, the extension stays up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use portcullis_api::{AccessDecision, InvalidExtension};
use thiserror::Error;

use crate::audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};
use crate::authority::AuthorityDirectory;
use crate::bundle::ExtensionBundle;
use crate::bytecode::BytecodeCallGuard;
use crate::policy::{AccessPolicy, RuleSet};
use crate::sandbox::{SandboxError, SandboxFileView};
use crate::verify::{PluginSignature, SignatureVerifier};

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Directory under which each extension gets its private sandbox root.
    pub sandbox_base: PathBuf,

    /// Refuse bundles whose verification outcome is unverified. On by
    /// default; admitting unsigned extensions is an explicit choice.
    pub require_signatures: bool,
}

impl GateConfig {
    /// Configuration with signature enforcement on.
    pub fn new(sandbox_base: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_base: sandbox_base.into(),
            require_signatures: true,
        }
    }

    /// Admit unsigned or unverifiable bundles.
    pub fn allow_unsigned(mut self) -> Self {
        self.require_signatures = false;
        self
    }
}

/// Errors surfaced by gate operations that are not plain access decisions.
#[derive(Debug, Error)]
pub enum GateError {
    /// The extension was rejected or is not installed.
    #[error(transparent)]
    Rejected(#[from] InvalidExtension),

    /// The sandbox root could not be opened.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Trust gate for dynamically loaded extensions.
///
/// Thread-safe: install, load-authorization and symbol checks may run
/// concurrently from multiple extension threads.
pub struct PluginLoadGate {
    rules: Arc<RuleSet>,
    policy: AccessPolicy,
    call_guard: BytecodeCallGuard,
    verifier: SignatureVerifier,
    config: GateConfig,
    audit: Arc<dyn AuditSink>,
    installed: RwLock<HashMap<String, PluginSignature>>,
}

impl PluginLoadGate {
    /// Create a gate over the given rules and authority directory.
    pub fn new(
        rules: Arc<RuleSet>,
        directory: Arc<dyn AuthorityDirectory>,
        config: GateConfig,
    ) -> Self {
        Self::with_audit(rules, directory, config, Arc::new(TracingAuditSink))
    }

    /// Create a gate reporting to a custom audit sink.
    pub fn with_audit(
        rules: Arc<RuleSet>,
        directory: Arc<dyn AuthorityDirectory>,
        config: GateConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy: AccessPolicy::new(rules.clone()),
            call_guard: BytecodeCallGuard::new(),
            verifier: SignatureVerifier::new(directory),
            rules,
            config,
            audit,
            installed: RwLock::new(HashMap::new()),
        }
    }

    /// Verify and admit a bundle. Runs the signature verifier exactly once;
    /// the sealed result is cached for the extension's lifetime.
    pub fn install(&self, bundle: &ExtensionBundle) -> Result<PluginSignature, InvalidExtension> {
        let manifest = bundle
            .plugin_manifest()
            .map_err(|err| InvalidExtension::new(err.to_string()))?;
        let name = manifest.name;

        let signature = match self.verifier.verify(bundle) {
            Ok(signature) => signature,
            Err(err) => {
                self.audit.record(
                    &AuditEvent::new(AuditKind::ExtensionRejected, &name)
                        .with_reason(&err.reason),
                );
                return Err(err);
            }
        };

        if !signature.verified() && self.config.require_signatures {
            let err = InvalidExtension::new(format!(
                "extension '{name}' is unsigned or unverifiable and unsigned extensions are not admitted"
            ));
            self.audit.record(
                &AuditEvent::new(AuditKind::ExtensionRejected, &name).with_reason(&err.reason),
            );
            return Err(err);
        }

        self.audit
            .record(&AuditEvent::new(AuditKind::ExtensionVerified, &name));
        // A poisoned lock still holds a valid map (inserts leave no partial
        // state); recover it so install and the cache cannot diverge.
        self.installed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, signature.clone());
        Ok(signature)
    }

    /// Decide whether a class from an installed extension may be loaded.
    ///
    /// Consults the name policy on the module's own fully-qualified name,
    /// then inspects its bytecode for blacklisted call sites. A policy
    /// denial is advisory (`Ok(Denied)`); a blacklisted call or unreadable
    /// bytecode hard-rejects the extension.
    pub fn authorize_class_load(
        &self,
        extension: &str,
        module_name: &str,
        module_bytes: &[u8],
        elevated: bool,
    ) -> Result<AccessDecision, InvalidExtension> {
        self.require_installed(extension)?;

        let decision = self.policy.decide(module_name, elevated);
        if let Some(reason) = decision.reason() {
            self.audit.record(
                &AuditEvent::new(AuditKind::ClassLoadDenied, extension).with_reason(reason),
            );
            return Ok(decision);
        }

        match self
            .call_guard
            .check(module_bytes, self.rules.method_blacklist())
        {
            Ok(decision) => {
                if let Some(reason) = decision.reason() {
                    // Blacklisted call sites hard-reject the extension.
                    let err = InvalidExtension::new(reason.to_string());
                    self.audit.record(
                        &AuditEvent::new(AuditKind::ExtensionRejected, extension)
                            .with_reason(reason),
                    );
                    return Err(err);
                }
                Ok(AccessDecision::Allowed)
            }
            Err(err) => {
                self.audit.record(
                    &AuditEvent::new(AuditKind::ExtensionRejected, extension)
                        .with_reason(&err.reason),
                );
                Err(err)
            }
        }
    }

    /// Advisory per-symbol check during execution. Denials are logged and
    /// returned as values; the extension continues degraded.
    pub fn resolve_symbol(&self, extension: &str, symbol: &str, elevated: bool) -> AccessDecision {
        let decision = self.policy.decide(symbol, elevated);
        if let Some(reason) = decision.reason() {
            self.audit
                .record(&AuditEvent::new(AuditKind::SymbolDenied, extension).with_reason(reason));
        }
        decision
    }

    /// Open the extension's private file view, rooted at
    /// `<sandbox_base>/<extension>`.
    pub fn open_file_view(&self, extension: &str) -> Result<SandboxFileView, GateError> {
        self.require_installed(extension)?;
        let root = self.config.sandbox_base.join(extension);
        let view = SandboxFileView::with_audit(extension, root, self.audit.clone())?;
        Ok(view)
    }

    /// The cached verification outcome for an installed extension.
    pub fn signature(&self, extension: &str) -> Option<PluginSignature> {
        self.installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(extension)
            .cloned()
    }

    /// Forget an extension. Returns whether it was installed.
    pub fn uninstall(&self, extension: &str) -> bool {
        self.installed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(extension)
            .is_some()
    }

    fn require_installed(&self, extension: &str) -> Result<(), InvalidExtension> {
        let installed = self
            .installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(extension);
        if installed {
            Ok(())
        } else {
            Err(InvalidExtension::new(format!(
                "extension '{extension}' is not installed"
            )))
        }
    }
}

impl std::fmt::Debug for PluginLoadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("PluginLoadGate")
            .field("installed", &count)
            .field("require_signatures", &self.config.require_signatures)
            .finish_non_exhaustive()
    }
}
