//! Static call-site inspection of extension modules
//!
//! Walks a module's instruction stream once and refuses it when any direct
//! call targets a blacklisted `owner#method` import, even when the owning
//! module is otherwise permitted by the name policy.
//!
//! # Coverage and limitations
//!
//! Only calls encoded directly as `call` instructions to imported functions
//! are inspected. `call_indirect`, table dispatch, and calls made by code
//! outside the inspected bundle are explicitly unguarded here; those paths
//! must be blocked at the symbol-resolution layer
//! ([`AccessPolicy`](crate::policy::AccessPolicy)) instead. This guard
//! applies only to modules originating from the untrusted bundle, never to
//! host or dependency code.

use std::collections::HashMap;

use portcullis_api::{AccessDecision, InvalidExtension};
use wasmparser::{KnownCustom, Name, Operator, Parser, Payload, TypeRef};

/// Stateless call-site inspector; safe for concurrent use.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytecodeCallGuard;

impl BytecodeCallGuard {
    /// Create a guard.
    pub fn new() -> Self {
        Self
    }

    /// Inspect `module_bytes` against the call blacklist.
    ///
    /// Returns `Denied` on the first blacklisted call site, citing the
    /// `owner#method` identifier and the enclosing function. Malformed
    /// bytecode is a hard [`InvalidExtension`] error: a module the parser
    /// cannot read cannot be vouched for.
    pub fn check(
        &self,
        module_bytes: &[u8],
        blacklist: &crate::policy::MethodPatternSet,
    ) -> Result<AccessDecision, InvalidExtension> {
        // Imported function identifiers, in index order. Imports occupy the
        // low end of the function index space, so a `call` with an index
        // below `imported.len()` targets one of these.
        let mut imported: Vec<String> = Vec::new();
        let mut function_names: HashMap<u32, String> = HashMap::new();
        let mut code_entries_seen: u32 = 0;
        let mut offense: Option<(u32, String)> = None;

        for payload in Parser::new(0).parse_all(module_bytes) {
            match payload.map_err(unreadable)? {
                Payload::ImportSection(imports) => {
                    for import in imports {
                        let import = import.map_err(unreadable)?;
                        if matches!(import.ty, TypeRef::Func(_)) {
                            imported.push(format!("{}#{}", import.module, import.name));
                        }
                    }
                }
                Payload::CodeSectionEntry(body) => {
                    let caller_index = imported.len() as u32 + code_entries_seen;
                    code_entries_seen += 1;

                    if offense.is_some() || blacklist.is_empty() {
                        continue;
                    }

                    let mut operators = body.get_operators_reader().map_err(unreadable)?;
                    while !operators.eof() {
                        let operator = operators.read().map_err(unreadable)?;
                        if let Operator::Call { function_index } = operator {
                            if let Some(identifier) = imported.get(function_index as usize) {
                                if blacklist.contains(identifier) {
                                    offense = Some((caller_index, identifier.clone()));
                                    break;
                                }
                            }
                        }
                    }
                }
                Payload::CustomSection(section) => {
                    // The name section is diagnostic only; a corrupt one is
                    // ignored rather than failing the module.
                    if let KnownCustom::Name(names) = section.as_known() {
                        for part in names {
                            let Ok(part) = part else { break };
                            if let Name::Function(map) = part {
                                for naming in map {
                                    let Ok(naming) = naming else { break };
                                    function_names.insert(naming.index, naming.name.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some((caller_index, identifier)) = offense {
            let caller = function_names
                .get(&caller_index)
                .cloned()
                .unwrap_or_else(|| format!("func[{caller_index}]"));
            return Ok(AccessDecision::denied(format!(
                "blacklisted call to '{identifier}' in function '{caller}'"
            )));
        }

        Ok(AccessDecision::Allowed)
    }
}

fn unreadable(err: wasmparser::BinaryReaderError) -> InvalidExtension {
    InvalidExtension::new(format!("unreadable module bytecode: {err}"))
}
