use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::engine::{BackendInstance, InstanceSetup};
use crate::error::{CallError, InstantiationError};
use crate::module::CompiledModule;
use crate::registry::HostState;
use crate::resolver::ResolvedImports;
use crate::types::{describe_args, ExportDescriptor, ExternType, FuncSignature, GuestAddress, Value};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

pub struct InstanceOptions {
    state: HostState,
    fuel: Option<u64>,
    track_allocations: bool,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// State handed to host functions called by this instance.
    pub fn with_state<T: Any + Send>(mut self, state: T) -> Self {
        self.state = HostState::new(state);
        self
    }

    /// Overrides the engine's default fuel budget.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    /// Record guest allocations made through the string exchange and reject unknown frees.
    pub fn track_allocations(mut self, enabled: bool) -> Self {
        self.track_allocations = enabled;
        self
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            state: HostState::default(),
            fuel: None,
            track_allocations: false,
        }
    }
}

/// A handle to one export of one instance.
#[derive(Debug, Clone)]
pub struct ExportHandle {
    instance: u64,
    descriptor: ExportDescriptor,
}

impl ExportHandle {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn ty(&self) -> &ExternType {
        &self.descriptor.ty
    }

    /// The function signature, if this export is a function.
    pub fn signature(&self) -> Option<&FuncSignature> {
        match &self.descriptor.ty {
            ExternType::Func(signature) => Some(signature),
            _ => None,
        }
    }
}

pub struct Instance {
    id: u64,
    module: CompiledModule,
    exports: IndexMap<String, ExportDescriptor>,
    pub(crate) inner: Box<dyn BackendInstance>,
    /// Live guest allocations, when tracking is enabled.
    pub(crate) allocations: Option<HashSet<GuestAddress>>,
}

impl Instance {
    pub fn new(module: &CompiledModule, imports: &ResolvedImports) -> Result<Self, InstantiationError> {
        Self::with_options(module, imports, InstanceOptions::default())
    }

    /// Binds `imports` positionally and runs the module's start function.
    ///
    /// No instance is returned when the start function traps.
    pub fn with_options(
        module: &CompiledModule,
        imports: &ResolvedImports,
        options: InstanceOptions,
    ) -> Result<Self, InstantiationError> {
        imports.check_against(module.imports())?;

        let setup = InstanceSetup {
            state: options.state,
            fuel: options.fuel.or(module.engine().default_fuel()),
            has_start: module.metadata().has_start(),
        };
        let inner = module.backend().instantiate(imports, setup)?;

        let exports = module
            .exports()
            .iter()
            .map(|export| (export.name.clone(), export.clone()))
            .collect();
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("instantiated module as instance {id}");
        Ok(Self {
            id,
            module: module.clone(),
            exports,
            inner,
            allocations: options.track_allocations.then(HashSet::new),
        })
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Exports in declaration order.
    pub fn exports(&self) -> impl ExactSizeIterator<Item = &ExportDescriptor> {
        self.exports.values()
    }

    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    /// Looks up an export by its exact name.
    pub fn find_export(&self, name: &str) -> Result<ExportHandle, CallError> {
        let descriptor = self
            .exports
            .get(name)
            .ok_or_else(|| CallError::NotFound(name.to_string()))?;
        Ok(ExportHandle {
            instance: self.id,
            descriptor: descriptor.clone(),
        })
    }

    /// Calls an exported function.
    ///
    /// Arguments are checked against the export's signature before the engine is entered.
    /// A trap leaves the instance usable for further calls.
    pub fn call(&mut self, handle: &ExportHandle, args: &[Value]) -> Result<Vec<Value>, CallError> {
        let name = handle.name();
        if handle.instance != self.id {
            return Err(CallError::ForeignHandle(name.to_string()));
        }
        let ExternType::Func(signature) = &handle.descriptor.ty else {
            return Err(CallError::NotCallable {
                name: name.to_string(),
                kind: handle.descriptor.kind(),
            });
        };
        if !signature.is_scalar() {
            return Err(CallError::UnsupportedSignature {
                name: name.to_string(),
                signature: signature.to_string(),
            });
        }
        if !signature.accepts(args) {
            return Err(CallError::SignatureMismatch {
                name: name.to_string(),
                expected: signature.to_string(),
                found: describe_args(args),
            });
        }

        tracing::debug!("calling `{name}` with {args:?}");
        let results = self
            .inner
            .call(name, args, signature.results())
            .map_err(|message| {
                tracing::debug!("`{name}` trapped: {message}");
                CallError::Trap {
                    name: name.to_string(),
                    message,
                }
            })?;
        tracing::debug!("`{name}` returned {results:?}");
        Ok(results)
    }

    /// Finds and calls an export in one step.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, CallError> {
        let handle = self.find_export(name)?;
        self.call(&handle, args)
    }

    pub fn state<T: Any>(&self) -> Option<&T> {
        self.inner.state().get()
    }

    pub fn state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.state_mut().get_mut()
    }

    /// Replaces the remaining fuel. Fails when the engine does not meter fuel.
    pub fn set_fuel(&mut self, fuel: u64) -> Result<(), String> {
        self.inner.set_fuel(fuel)
    }

    /// `None` when the engine does not meter fuel.
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.inner.remaining_fuel()
    }

    /// Destroys the instance and releases its memory.
    pub fn destroy(self) {
        tracing::debug!("destroying instance {}", self.id);
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("exports", &self.exports.len())
            .finish_non_exhaustive()
    }
}
