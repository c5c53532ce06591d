//! Matches a module's declared imports against the host registry.

use crate::error::ImportError;
use crate::module::CompiledModule;
use crate::registry::{HostBinding, HostFunction, HostFunctionRegistry};
use crate::types::{ExternType, GlobalSignature, ImportDescriptor, MemorySignature, Value};

#[derive(Debug, Clone)]
pub enum ResolvedBinding {
    Func(HostFunction),
    Global {
        signature: GlobalSignature,
        value: Value,
        /// No explicit binding existed; the value is the type's zero.
        defaulted: bool,
    },
    /// A fresh memory is allocated with these limits at instantiation.
    Memory(MemorySignature),
    /// Provided by the engine itself (e.g. WASI).
    Engine,
}

#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub descriptor: ImportDescriptor,
    pub binding: ResolvedBinding,
}

/// Import bindings in the module's declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedImports {
    entries: Vec<ResolvedImport>,
}

impl ResolvedImports {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedImport> {
        self.entries.iter()
    }

    /// Checks that this set lines up one-to-one with `imports`.
    pub(crate) fn check_against(&self, imports: &[ImportDescriptor]) -> Result<(), ImportError> {
        if self.entries.len() != imports.len() {
            return Err(ImportError::CountMismatch {
                expected: imports.len(),
                resolved: self.entries.len(),
            });
        }
        for (index, (entry, declared)) in self.entries.iter().zip(imports).enumerate() {
            if entry.descriptor != *declared {
                return Err(ImportError::OrderMismatch {
                    index,
                    expected: declared.to_string(),
                    found: entry.descriptor.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ResolvedImports {
    type Item = &'a ResolvedImport;
    type IntoIter = std::slice::Iter<'a, ResolvedImport>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Resolves every import of `module`, stopping at the first one that cannot be bound.
///
/// The result holds one entry per declared import, in declaration order. A missing
/// binding surfaces as [`ImportError::Unresolved`]; count and order are only checked
/// again when the set is handed to [`Instance::new`](crate::Instance::new).
pub fn resolve(
    module: &CompiledModule,
    registry: &HostFunctionRegistry,
) -> Result<ResolvedImports, ImportError> {
    let imports = module.imports();
    let mut entries = Vec::with_capacity(imports.len());
    for import in imports {
        let binding = resolve_one(module, registry, import)?;
        entries.push(ResolvedImport {
            descriptor: import.clone(),
            binding,
        });
    }

    let resolved = ResolvedImports { entries };
    tracing::debug!("resolved {} imports", resolved.len());
    Ok(resolved)
}

fn resolve_one(
    module: &CompiledModule,
    registry: &HostFunctionRegistry,
    import: &ImportDescriptor,
) -> Result<ResolvedBinding, ImportError> {
    let unsupported = || ImportError::UnsupportedKind {
        module: import.module.clone(),
        name: import.name.clone(),
        kind: import.kind(),
    };
    let mismatch = |found: String| ImportError::SignatureMismatch {
        module: import.module.clone(),
        name: import.name.clone(),
        expected: import.ty.to_string(),
        found,
    };

    match &import.ty {
        ExternType::Func(expected) => {
            if let Some(binding) = registry.get(&import.module, &import.name) {
                return match binding {
                    HostBinding::Func(func) if func.signature() == expected => {
                        Ok(ResolvedBinding::Func(func.clone()))
                    }
                    other => Err(mismatch(other.describe())),
                };
            }
            if module.engine_provides(&import.module) {
                return Ok(ResolvedBinding::Engine);
            }
            Err(ImportError::Unresolved {
                module: import.module.clone(),
                name: import.name.clone(),
            })
        }
        ExternType::Global(signature) => match registry.get(&import.module, &import.name) {
            Some(HostBinding::Global(global)) if global.signature() == *signature => {
                Ok(ResolvedBinding::Global {
                    signature: *signature,
                    value: global.value,
                    defaulted: false,
                })
            }
            Some(other) => Err(mismatch(other.describe())),
            None => {
                let value = Value::zero(signature.content).ok_or_else(unsupported)?;
                tracing::warn!(
                    "no binding for global import {}::{}, defaulting to zero",
                    import.module,
                    import.name
                );
                Ok(ResolvedBinding::Global {
                    signature: *signature,
                    value,
                    defaulted: true,
                })
            }
        },
        ExternType::Memory(signature) => {
            if signature.shared || signature.memory64 {
                return Err(unsupported());
            }
            Ok(ResolvedBinding::Memory(*signature))
        }
        ExternType::Table(_) | ExternType::Tag => Err(unsupported()),
    }
}
