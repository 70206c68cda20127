//! End-to-end test of the extension gate: a signed bundle is installed,
//! its modules pass or fail class-load checks, and file access stays
//! confined to the extension's sandbox root.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use portcullis_host::{
    module_name_hash, ExtensionBundle, GateConfig, PinnedAuthorityDirectory, PluginLoadGate,
    PluginManifest, RuleSet, SignatureManifest,
};

const AUTHORITY: &str = "acme-plugins";

const FILTER_WAT: &str = r#"
(module
  (import "host.log" "info" (func $info (param i32)))
  (func $apply (call $info (i32.const 1)))
  (export "apply" (func $apply)))
"#;

const KILLER_WAT: &str = r#"
(module
  (import "host.process" "exit" (func $exit (param i32)))
  (func $sabotage (call $exit (i32.const 1)))
  (export "apply" (func $sabotage)))
"#;

fn rules() -> Arc<RuleSet> {
    RuleSet::builder()
        .allow(["acme."])
        .deny_package(["host.gui."])
        .deny_always(["host.loader."])
        .deny_call(["host.process#exit"])
        .build()
}

fn signed_bundle(key: &SigningKey, name: &str, modules: &[(&str, Vec<u8>)]) -> ExtensionBundle {
    let manifest = PluginManifest {
        name: name.into(),
        version: Some("1.0.0".into()),
        description: None,
        entry: modules.first().map(|(module, _)| module.to_string()),
    };

    let mut signatures = BTreeMap::new();
    let mut entries = vec![("plugin.manifest".to_string(), manifest.to_vec().unwrap())];
    for (module, bytes) in modules {
        signatures.insert(
            module_name_hash(module),
            BASE64.encode(key.sign(bytes).to_bytes()),
        );
        entries.push((format!("{module}.wasm"), bytes.clone()));
    }

    let signature_manifest = SignatureManifest {
        authority: AUTHORITY.into(),
        public: BASE64.encode(key.verifying_key().to_bytes()),
        signatures,
    };
    entries.push((
        "signature.manifest".to_string(),
        signature_manifest.to_vec().unwrap(),
    ));

    ExtensionBundle::from_entries(entries)
}

fn gate_for(key: &SigningKey, sandbox_base: &std::path::Path) -> PluginLoadGate {
    let directory =
        PinnedAuthorityDirectory::new().pin(AUTHORITY, key.verifying_key().to_bytes().to_vec());
    PluginLoadGate::new(rules(), Arc::new(directory), GateConfig::new(sandbox_base))
}

#[test]
fn signed_extension_full_lifecycle() {
    let key = SigningKey::from_bytes(&[42u8; 32]);
    let sandbox = tempfile::tempdir().unwrap();
    let gate = gate_for(&key, sandbox.path());

    let filter = wat::parse_str(FILTER_WAT).unwrap();
    let bundle = signed_bundle(
        &key,
        "night-vision",
        &[("acme.filters.NightVision", filter.clone())],
    );

    // Install verifies once, against the pinned authority key.
    let signature = gate.install(&bundle).unwrap();
    assert!(signature.verified());
    assert_eq!(signature.authority().unwrap().name, AUTHORITY);

    // Class load: whitelisted name, clean bytecode.
    let decision = gate
        .authorize_class_load("night-vision", "acme.filters.NightVision", &filter, false)
        .unwrap();
    assert!(decision.is_allowed());

    // Symbol resolution during execution: package blacklist applies.
    assert!(!gate
        .resolve_symbol("night-vision", "host.gui.PanelHandle", false)
        .is_allowed());
    assert!(gate
        .resolve_symbol("night-vision", "acme.util.Math", false)
        .is_allowed());

    // File access confined to the per-extension root.
    let view = gate.open_file_view("night-vision").unwrap();
    view.mkdir("frames").unwrap();
    view.write("frames/0001.raw", b"frame data").unwrap();
    assert_eq!(view.read("frames/0001.raw").unwrap(), b"frame data");

    let err = view.read("../../somewhere/else").unwrap_err();
    assert!(err.is_security_violation());

    assert!(view.close());
    assert!(!view.close());
}

#[test]
fn tampered_bundle_never_installs() {
    let key = SigningKey::from_bytes(&[42u8; 32]);
    let sandbox = tempfile::tempdir().unwrap();
    let gate = gate_for(&key, sandbox.path());

    let filter = wat::parse_str(FILTER_WAT).unwrap();
    let bundle = signed_bundle(&key, "evil-twin", &[("acme.filters.Twin", filter)]);

    // Flip one byte of the module after signing.
    let mut tampered_module = bundle.entry("acme.filters.Twin.wasm").unwrap().to_vec();
    tampered_module[8] ^= 0x01;
    let tampered = ExtensionBundle::from_entries([
        (
            "plugin.manifest".to_string(),
            bundle.entry("plugin.manifest").unwrap().to_vec(),
        ),
        (
            "signature.manifest".to_string(),
            bundle.entry("signature.manifest").unwrap().to_vec(),
        ),
        ("acme.filters.Twin.wasm".to_string(), tampered_module),
    ]);

    let err = gate.install(&tampered).unwrap_err();
    assert!(err.reason.contains("acme.filters.Twin"), "{err}");
    assert!(gate.signature("evil-twin").is_none());
}

#[test]
fn blacklisted_call_rejects_even_signed_extension() {
    let key = SigningKey::from_bytes(&[42u8; 32]);
    let sandbox = tempfile::tempdir().unwrap();
    let gate = gate_for(&key, sandbox.path());

    let killer = wat::parse_str(KILLER_WAT).unwrap();
    let bundle = signed_bundle(&key, "saboteur", &[("acme.filters.Saboteur", killer.clone())]);

    // The signature is legitimate, so install succeeds.
    assert!(gate.install(&bundle).unwrap().verified());

    // But the bytecode guard refuses the blacklisted call site.
    let err = gate
        .authorize_class_load("saboteur", "acme.filters.Saboteur", &killer, false)
        .unwrap_err();
    assert!(err.reason.contains("host.process#exit"), "{err}");
}

#[test]
fn directory_packaged_bundle_round_trip() {
    let key = SigningKey::from_bytes(&[42u8; 32]);
    let sandbox = tempfile::tempdir().unwrap();
    let gate = gate_for(&key, sandbox.path());

    let filter = wat::parse_str(FILTER_WAT).unwrap();
    let bundle = signed_bundle(&key, "on-disk", &[("acme.filters.Disk", filter)]);

    // Write the bundle out as a directory package and read it back.
    let package = tempfile::tempdir().unwrap();
    for entry in ["plugin.manifest", "signature.manifest", "acme.filters.Disk.wasm"] {
        std::fs::write(package.path().join(entry), bundle.entry(entry).unwrap()).unwrap();
    }

    let reloaded = ExtensionBundle::from_dir(package.path()).unwrap();
    assert!(gate.install(&reloaded).unwrap().verified());
}
