//! Host-provided bindings that guest imports are resolved against.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use wasmhost_config::HostConfig;

use crate::error::RegistryError;
use crate::types::{FuncSignature, GlobalSignature, Value};

/// Error returned by a host function. Surfaces in the guest as a trap.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostTrap {
    message: String,
}

impl HostTrap {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-instance state owned by the host, handed to every host function call.
pub struct HostState {
    data: Box<dyn Any + Send>,
}

impl HostState {
    pub fn new<T: Any + Send>(data: T) -> Self {
        Self {
            data: Box::new(data),
        }
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new(())
    }
}

impl fmt::Debug for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostState").finish_non_exhaustive()
    }
}

/// What a host function sees of its caller.
pub struct HostCallContext<'a> {
    memory: Option<&'a mut [u8]>,
    state: &'a mut HostState,
}

impl<'a> HostCallContext<'a> {
    pub(crate) fn new(memory: Option<&'a mut [u8]>, state: &'a mut HostState) -> Self {
        Self { memory, state }
    }

    /// The calling instance's exported `memory`, if it has one.
    pub fn memory(&mut self) -> Option<&mut [u8]> {
        self.memory.as_deref_mut()
    }

    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.get()
    }

    pub fn state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.state.get_mut()
    }
}

pub type HostFn =
    dyn Fn(&mut HostCallContext<'_>, &[Value]) -> Result<Vec<Value>, HostTrap> + Send + Sync;

#[derive(Clone)]
pub struct HostFunction {
    signature: FuncSignature,
    implementation: Arc<HostFn>,
}

impl HostFunction {
    pub fn signature(&self) -> &FuncSignature {
        &self.signature
    }

    /// Runs the implementation and checks its results against the declared signature.
    pub(crate) fn invoke(
        &self,
        cx: &mut HostCallContext<'_>,
        args: &[Value],
    ) -> Result<Vec<Value>, HostTrap> {
        let results = (self.implementation)(cx, args)?;
        if !self.signature.produces(&results) {
            return Err(HostTrap::new(format!(
                "host function returned {} values, declared results {}",
                results.len(),
                self.signature
            )));
        }
        Ok(results)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostGlobal {
    pub value: Value,
    pub mutable: bool,
}

impl HostGlobal {
    pub fn signature(&self) -> GlobalSignature {
        GlobalSignature {
            content: self.value.ty(),
            mutable: self.mutable,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HostBinding {
    Func(HostFunction),
    Global(HostGlobal),
}

impl HostBinding {
    pub fn describe(&self) -> String {
        match self {
            HostBinding::Func(func) => format!("func {}", func.signature),
            HostBinding::Global(global) => format!("global {}", global.signature()),
        }
    }
}

/// Table of host bindings keyed by `(module, name)`.
///
/// Cloning is cheap: implementations are shared, not copied.
#[derive(Debug, Clone, Default)]
pub struct HostFunctionRegistry {
    bindings: IndexMap<(String, String), HostBinding>,
}

impl HostFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constant functions and globals declared in `host_config`.
    ///
    /// Each configured function ignores its arguments and returns its configured results.
    pub fn create_from_host_config(host_config: &HostConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for func in host_config.host_functions.iter() {
            let results: Vec<Value> = func.results.iter().copied().map(Value::from).collect();
            let signature = FuncSignature::new(
                func.params.iter().copied().map(Into::into),
                results.iter().map(Value::ty),
            );
            registry.register(&func.module, &func.name, signature, move |_, _| {
                Ok(results.clone())
            })?;
        }
        for global in host_config.host_globals.iter() {
            registry.register_global(
                &global.module,
                &global.name,
                global.value.into(),
                global.mutable,
            )?;
        }
        Ok(registry)
    }

    pub fn register<F>(
        &mut self,
        module: &str,
        name: &str,
        signature: FuncSignature,
        implementation: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut HostCallContext<'_>, &[Value]) -> Result<Vec<Value>, HostTrap>
            + Send
            + Sync
            + 'static,
    {
        let func = HostFunction {
            signature,
            implementation: Arc::new(implementation),
        };
        self.insert(module, name, HostBinding::Func(func))
    }

    pub fn register_global(
        &mut self,
        module: &str,
        name: &str,
        value: Value,
        mutable: bool,
    ) -> Result<(), RegistryError> {
        self.insert(module, name, HostBinding::Global(HostGlobal { value, mutable }))
    }

    fn insert(&mut self, module: &str, name: &str, binding: HostBinding) -> Result<(), RegistryError> {
        let key = (module.to_string(), name.to_string());
        if self.bindings.contains_key(&key) {
            return Err(RegistryError::DuplicateBinding {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        tracing::debug!("registered host binding {module}::{name}: {}", binding.describe());
        self.bindings.insert(key, binding);
        Ok(())
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&HostBinding> {
        self.bindings.get(&(module.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &HostBinding)> {
        self.bindings
            .iter()
            .map(|((module, name), binding)| (module.as_str(), name.as_str(), binding))
    }
}
