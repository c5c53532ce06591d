//! Embeds WebAssembly plugins in a host process.
//!
//! A plugin is loaded and compiled once into a [`CompiledModule`], its imports are
//! resolved against a [`HostFunctionRegistry`], and each [`Instance`] created from it owns
//! its own linear memory. Exports are called through signature-checked handles; strings
//! cross the boundary through the guest's allocator exports.
//!
//! ```no_run
//! use wasmhost_runtime::{Engine, EngineConfig, HostFunctionRegistry, Value};
//!
//! # fn main() -> wasmhost_runtime::Result<()> {
//! let engine = Engine::new(&EngineConfig::default())?;
//! let module = engine.load("plugin.wasm")?;
//! let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
//! let sum = instance.invoke("sum", &[Value::I32(7), Value::I32(3)])?;
//! assert_eq!(sum, vec![Value::I32(10)]);
//! let text = instance.take_string("get_heap_allocated_string", "free_heap_allocated_string")?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
mod exchange;
pub mod instance;
pub mod memory;
pub mod metadata;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod types;

/// Name of the exported memory used by the memory bridge and host functions.
pub const DEFAULT_MEMORY: &str = "memory";

pub use engine::{Engine, EngineConfig, EngineKind, Preopen, WasiConfig};
pub use error::{
    CallError, EngineError, Error, ImportError, InstantiationError, LoadError, MemoryError,
    RegistryError, Result,
};
pub use instance::{ExportHandle, Instance, InstanceOptions};
pub use memory::{MemoryView, PAGE_SIZE};
pub use metadata::ModuleMetadata;
pub use module::{CompiledModule, ModuleImage};
pub use registry::{HostCallContext, HostFunctionRegistry, HostState, HostTrap};
pub use resolver::{resolve, ResolvedBinding, ResolvedImport, ResolvedImports};
pub use types::{
    ExportDescriptor, ExternKind, ExternType, FuncSignature, GlobalSignature, GuestAddress,
    ImportDescriptor, MemorySignature, TableSignature, ValType, Value,
};
