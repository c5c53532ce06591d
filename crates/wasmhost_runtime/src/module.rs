use std::path::Path;
use std::sync::Arc;

use crate::engine::{BackendModule, Engine};
use crate::error::{Error, LoadError};
use crate::instance::{Instance, InstanceOptions};
use crate::metadata::{self, ModuleMetadata};
use crate::registry::HostFunctionRegistry;
use crate::resolver;
use crate::types::{ExportDescriptor, ImportDescriptor};

/// Raw module bytes, either binary WebAssembly or the text format.
#[derive(Debug, Clone)]
pub struct ModuleImage {
    bytes: Vec<u8>,
}

impl ModuleImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Reads the whole file at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ModuleImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for ModuleImage {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

/// A validated module, ready to be instantiated any number of times.
///
/// Cloning shares the compiled code.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    engine: Engine,
    module: Arc<dyn BackendModule>,
    imports: Vec<ImportDescriptor>,
    exports: Vec<ExportDescriptor>,
    metadata: ModuleMetadata,
}

impl CompiledModule {
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Imports in declaration order.
    pub fn imports(&self) -> &[ImportDescriptor] {
        &self.inner.imports
    }

    /// Exports in declaration order.
    pub fn exports(&self) -> &[ExportDescriptor] {
        &self.inner.exports
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        &self.inner.metadata
    }

    pub(crate) fn backend(&self) -> &dyn BackendModule {
        self.inner.module.as_ref()
    }

    pub(crate) fn engine_provides(&self, namespace: &str) -> bool {
        self.inner.engine.backend().provides(namespace)
    }

    /// Resolves imports against `registry` and instantiates with default options.
    pub fn instantiate(&self, registry: &HostFunctionRegistry) -> Result<Instance, Error> {
        self.instantiate_with(registry, InstanceOptions::default())
    }

    pub fn instantiate_with(
        &self,
        registry: &HostFunctionRegistry,
        options: InstanceOptions,
    ) -> Result<Instance, Error> {
        let imports = resolver::resolve(self, registry)?;
        Ok(Instance::with_options(self, &imports, options)?)
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("engine", &self.inner.engine.kind())
            .field("imports", &self.inner.imports.len())
            .field("exports", &self.inner.exports.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Reads and compiles the module at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<CompiledModule, LoadError> {
        let path = path.as_ref();
        tracing::debug!("loading module {}", path.display());
        let image = ModuleImage::read(path)?;
        self.compile(image)
    }

    /// Compiles an in-memory image. Text-format modules are converted first.
    pub fn compile(&self, image: impl Into<ModuleImage>) -> Result<CompiledModule, LoadError> {
        let image = image.into();
        let wasm =
            wat::parse_bytes(image.bytes()).map_err(|e| LoadError::InvalidBinary(e.to_string()))?;
        let metadata = metadata::scan(&wasm)?;
        let parts = self
            .backend()
            .compile(&wasm)
            .map_err(LoadError::InvalidBinary)?;
        tracing::debug!(
            "compiled module on {:?}: {} imports, {} exports",
            self.kind(),
            parts.imports.len(),
            parts.exports.len()
        );
        Ok(CompiledModule {
            inner: Arc::new(ModuleInner {
                engine: self.clone(),
                module: parts.module,
                imports: parts.imports,
                exports: parts.exports,
                metadata,
            }),
        })
    }
}
