//! portcullis-host: load-time trust gate for sandboxed extensions
//!
//! Decides, before the class loader makes anything usable, whether an
//! extension bundle and its modules may enter the host process: name-based
//! access policy, static call-site inspection, per-module signature
//! verification against pinned authorities, and a path-confined file view.
//!
//! This is a best-effort, name-based boundary, not a tamper-proof sandbox;
//! see the module docs for the documented limitations.

pub mod audit;
pub mod authority;
pub mod bundle;
pub mod bytecode;
pub mod gate;
pub mod policy;
pub mod sandbox;
pub mod verify;

pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink, NullAuditSink, TracingAuditSink};
pub use authority::{Authority, AuthorityDirectory, DirectoryError, PinnedAuthorityDirectory};
pub use bundle::{BundleError, ExtensionBundle};
pub use bytecode::BytecodeCallGuard;
pub use gate::{GateConfig, GateError, PluginLoadGate};
pub use policy::{AccessPolicy, MethodPatternSet, NamePatternSet, RuleSet, RuleSetBuilder};
pub use portcullis_api::{AccessDecision, InvalidExtension, PluginManifest, SignatureManifest};
pub use sandbox::{SandboxError, SandboxFileView, SandboxPathGuard};
pub use verify::{module_name_hash, PluginSignature, SignatureVerifier};
