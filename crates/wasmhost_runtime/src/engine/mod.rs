//! Engine backends.
//!
//! Everything above this module (resolution, dispatch, memory access) is written against
//! the [`Backend`] traits, so switching engines is a configuration choice rather than a
//! second copy of the host logic.

mod config;
mod linker;
mod store;
#[cfg(feature = "wasmi")]
mod wasmi_backend;
mod wasmtime_backend;

use std::sync::Arc;

pub use config::{EngineConfig, EngineKind, Preopen, WasiConfig};

use crate::error::{EngineError, InstantiationError};
use crate::registry::HostState;
use crate::resolver::ResolvedImports;
use crate::types::{ExportDescriptor, ImportDescriptor, ValType, Value};

/// Engine-specific compiler.
pub(crate) trait Backend: Send + Sync {
    /// Whether imports from `namespace` are supplied by the engine itself.
    fn provides(&self, namespace: &str) -> bool;

    fn compile(&self, wasm: &[u8]) -> Result<CompiledParts, String>;
}

pub(crate) struct CompiledParts {
    pub(crate) module: Arc<dyn BackendModule>,
    pub(crate) imports: Vec<ImportDescriptor>,
    pub(crate) exports: Vec<ExportDescriptor>,
}

pub(crate) struct InstanceSetup {
    pub(crate) state: HostState,
    pub(crate) fuel: Option<u64>,
    /// The module declares a start function; failures are reported as start traps.
    pub(crate) has_start: bool,
}

pub(crate) trait BackendModule: Send + Sync {
    /// Precondition: `imports` was checked against this module's import list.
    fn instantiate(
        &self,
        imports: &ResolvedImports,
        setup: InstanceSetup,
    ) -> Result<Box<dyn BackendInstance>, InstantiationError>;
}

pub(crate) trait BackendInstance: Send {
    /// Precondition: `args` match the export's parameters and `results` its result types.
    /// Errors carry the engine's trap message.
    fn call(&mut self, name: &str, args: &[Value], results: &[ValType]) -> Result<Vec<Value>, String>;

    fn memory(&mut self, name: &str) -> Option<&mut [u8]>;

    /// Returns the previous size in pages, or `None` when there is no such memory.
    fn grow_memory(&mut self, name: &str, delta: u64) -> Option<Result<u64, String>>;

    fn state(&self) -> &HostState;

    fn state_mut(&mut self) -> &mut HostState;

    fn set_fuel(&mut self, fuel: u64) -> Result<(), String>;

    fn remaining_fuel(&self) -> Option<u64>;
}

/// A configured WebAssembly engine. Cheap to clone and shareable across threads.
#[derive(Clone)]
pub struct Engine {
    kind: EngineKind,
    fuel: Option<u64>,
    backend: Arc<dyn Backend>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let backend: Arc<dyn Backend> = match config.kind {
            EngineKind::Wasmtime => Arc::new(wasmtime_backend::WasmtimeBackend::new(config)?),
            EngineKind::Wasmi => wasmi_engine(config)?,
        };
        tracing::debug!("created {:?} engine (fuel={:?})", config.kind, config.fuel);
        Ok(Self {
            kind: config.kind,
            fuel: config.fuel,
            backend,
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Default fuel budget applied to new instances.
    pub fn default_fuel(&self) -> Option<u64> {
        self.fuel
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("fuel", &self.fuel)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "wasmi")]
fn wasmi_engine(config: &EngineConfig) -> Result<Arc<dyn Backend>, EngineError> {
    Ok(Arc::new(wasmi_backend::WasmiBackend::new(config)?))
}

#[cfg(not(feature = "wasmi"))]
fn wasmi_engine(_config: &EngineConfig) -> Result<Arc<dyn Backend>, EngineError> {
    Err(EngineError::Unavailable("wasmi"))
}
