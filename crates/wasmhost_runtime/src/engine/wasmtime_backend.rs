use wasmtime::{
    Caller, Extern, Func, FuncType, Global, GlobalType, Memory, MemoryType, Module, Mutability,
    Store, Val,
};

use super::config::{EngineConfig, WasiConfig};
use super::linker::{wasi_ctx, wasi_linker, WASIP1_MODULE};
use super::store::WasmtimeStore;
use super::{Backend, BackendInstance, BackendModule, CompiledParts, InstanceSetup};
use crate::error::{EngineError, ImportError, InstantiationError};
use crate::registry::{HostCallContext, HostFunction};
use crate::resolver::{ResolvedBinding, ResolvedImports};
use crate::types::{
    ExportDescriptor, ExternType, FuncSignature, GlobalSignature, ImportDescriptor,
    MemorySignature, TableSignature, ValType, Value,
};
use crate::DEFAULT_MEMORY;

pub(crate) struct WasmtimeBackend {
    engine: wasmtime::Engine,
    wasi: Option<WasiConfig>,
}

impl WasmtimeBackend {
    pub(crate) fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut wasmtime_config = wasmtime::Config::new();
        wasmtime_config.wasm_backtrace(true);
        wasmtime_config.consume_fuel(config.fuel.is_some());
        let engine = wasmtime::Engine::new(&wasmtime_config)
            .map_err(|e| EngineError::Config(format!("{e:#}")))?;
        Ok(Self {
            engine,
            wasi: config.wasi.clone(),
        })
    }
}

impl Backend for WasmtimeBackend {
    fn provides(&self, namespace: &str) -> bool {
        self.wasi.is_some() && namespace == WASIP1_MODULE
    }

    fn compile(&self, wasm: &[u8]) -> Result<CompiledParts, String> {
        let module = Module::new(&self.engine, wasm).map_err(|e| format!("{e:#}"))?;
        let imports = module
            .imports()
            .map(|import| ImportDescriptor {
                module: import.module().to_string(),
                name: import.name().to_string(),
                ty: extern_type(&import.ty()),
            })
            .collect();
        let exports = module
            .exports()
            .map(|export| ExportDescriptor {
                name: export.name().to_string(),
                ty: extern_type(&export.ty()),
            })
            .collect();
        Ok(CompiledParts {
            module: std::sync::Arc::new(WasmtimeModule {
                engine: self.engine.clone(),
                module,
                wasi: self.wasi.clone(),
            }),
            imports,
            exports,
        })
    }
}

struct WasmtimeModule {
    engine: wasmtime::Engine,
    module: Module,
    wasi: Option<WasiConfig>,
}

impl BackendModule for WasmtimeModule {
    fn instantiate(
        &self,
        imports: &ResolvedImports,
        setup: InstanceSetup,
    ) -> Result<Box<dyn BackendInstance>, InstantiationError> {
        let engine_error = |e: anyhow::Error| InstantiationError::Engine(format!("{e:#}"));

        let wasi = wasi_ctx(self.wasi.as_ref()).map_err(engine_error)?;
        let mut store = Store::new(
            &self.engine,
            WasmtimeStore {
                host: setup.state,
                wasi,
            },
        );
        if let Some(fuel) = setup.fuel {
            store.set_fuel(fuel).map_err(engine_error)?;
        }

        let needs_wasi = imports
            .iter()
            .any(|import| matches!(import.binding, ResolvedBinding::Engine));
        let linker = if needs_wasi {
            Some(wasi_linker(&self.engine).map_err(engine_error)?)
        } else {
            None
        };

        let mut externs: Vec<Extern> = Vec::with_capacity(imports.len());
        for import in imports {
            let ext = match &import.binding {
                ResolvedBinding::Func(func) => host_func(&mut store, &self.engine, func).into(),
                ResolvedBinding::Global {
                    signature, value, ..
                } => {
                    let mutability = if signature.mutable {
                        Mutability::Var
                    } else {
                        Mutability::Const
                    };
                    let ty = GlobalType::new(to_val_type(signature.content), mutability);
                    Global::new(&mut store, ty, to_val(value))
                        .map_err(engine_error)?
                        .into()
                }
                ResolvedBinding::Memory(signature) => {
                    Memory::new(&mut store, memory_type(signature)?)
                        .map_err(engine_error)?
                        .into()
                }
                ResolvedBinding::Engine => linker
                    .as_ref()
                    .and_then(|linker| {
                        linker.get(&mut store, &import.descriptor.module, &import.descriptor.name)
                    })
                    .ok_or_else(|| ImportError::Unresolved {
                        module: import.descriptor.module.clone(),
                        name: import.descriptor.name.clone(),
                    })?,
            };
            externs.push(ext);
        }

        let instance = wasmtime::Instance::new(&mut store, &self.module, &externs).map_err(|e| {
            if e.downcast_ref::<wasmtime::Trap>().is_some() || setup.has_start {
                InstantiationError::StartTrap(format!("{e:#}"))
            } else {
                InstantiationError::Engine(format!("{e:#}"))
            }
        })?;

        Ok(Box::new(WasmtimeInstance { instance, store }))
    }
}

struct WasmtimeInstance {
    instance: wasmtime::Instance,
    store: Store<WasmtimeStore>,
}

impl BackendInstance for WasmtimeInstance {
    fn call(&mut self, name: &str, args: &[Value], results: &[ValType]) -> Result<Vec<Value>, String> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| format!("export `{name}` is not a function"))?;
        let params: Vec<Val> = args.iter().map(to_val).collect();
        let mut out: Vec<Val> = results.iter().map(|ty| zero_val(*ty)).collect();
        func.call(&mut self.store, &params, &mut out)
            .map_err(|e| format!("{e:#}"))?;
        out.iter().map(from_val).collect()
    }

    fn memory(&mut self, name: &str) -> Option<&mut [u8]> {
        let memory = self.instance.get_memory(&mut self.store, name)?;
        Some(memory.data_mut(&mut self.store))
    }

    fn grow_memory(&mut self, name: &str, delta: u64) -> Option<Result<u64, String>> {
        let memory = self.instance.get_memory(&mut self.store, name)?;
        Some(
            memory
                .grow(&mut self.store, delta)
                .map_err(|e| format!("{e:#}")),
        )
    }

    fn state(&self) -> &crate::registry::HostState {
        &self.store.data().host
    }

    fn state_mut(&mut self) -> &mut crate::registry::HostState {
        &mut self.store.data_mut().host
    }

    fn set_fuel(&mut self, fuel: u64) -> Result<(), String> {
        self.store.set_fuel(fuel).map_err(|e| format!("{e:#}"))
    }

    fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}

/// Wraps a registry function as a Wasmtime function owned by `store`.
fn host_func(store: &mut Store<WasmtimeStore>, engine: &wasmtime::Engine, func: &HostFunction) -> Func {
    let signature = func.signature();
    let ty = FuncType::new(
        engine,
        signature.params().iter().map(|ty| to_val_type(*ty)),
        signature.results().iter().map(|ty| to_val_type(*ty)),
    );
    let func = func.clone();
    Func::new(
        store,
        ty,
        move |mut caller: Caller<'_, WasmtimeStore>, params: &[Val], results: &mut [Val]| {
            let args = params
                .iter()
                .map(from_val)
                .collect::<Result<Vec<_>, _>>()
                .map_err(wasmtime::Error::msg)?;
            let memory = caller
                .get_export(DEFAULT_MEMORY)
                .and_then(Extern::into_memory);
            let values = match memory {
                Some(memory) => {
                    let (bytes, data) = memory.data_and_store_mut(&mut caller);
                    func.invoke(&mut HostCallContext::new(Some(bytes), &mut data.host), &args)
                }
                None => func.invoke(
                    &mut HostCallContext::new(None, &mut caller.data_mut().host),
                    &args,
                ),
            }
            .map_err(wasmtime::Error::new)?;
            for (slot, value) in results.iter_mut().zip(&values) {
                *slot = to_val(value);
            }
            Ok(())
        },
    )
}

fn memory_type(signature: &MemorySignature) -> Result<MemoryType, InstantiationError> {
    let pages = |n: u64| {
        u32::try_from(n).map_err(|_| {
            InstantiationError::Engine(format!("memory limit of {n} pages is out of range"))
        })
    };
    let maximum = signature.maximum.map(pages).transpose()?;
    Ok(MemoryType::new(pages(signature.minimum)?, maximum))
}

fn to_val(value: &Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(*v),
        Value::I64(v) => Val::I64(*v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Result<Value, String> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
        other => Err(format!("non-scalar value {other:?} cannot cross the host boundary")),
    }
}

fn zero_val(ty: ValType) -> Val {
    match Value::zero(ty) {
        Some(value) => to_val(&value),
        None => Val::I32(0),
    }
}

fn to_val_type(ty: ValType) -> wasmtime::ValType {
    match ty {
        ValType::I32 => wasmtime::ValType::I32,
        ValType::I64 => wasmtime::ValType::I64,
        ValType::F32 => wasmtime::ValType::F32,
        ValType::F64 => wasmtime::ValType::F64,
        ValType::V128 => wasmtime::ValType::V128,
        ValType::FuncRef => wasmtime::ValType::FUNCREF,
        ValType::ExternRef => wasmtime::ValType::EXTERNREF,
    }
}

fn from_val_type(ty: &wasmtime::ValType) -> ValType {
    match ty {
        wasmtime::ValType::I32 => ValType::I32,
        wasmtime::ValType::I64 => ValType::I64,
        wasmtime::ValType::F32 => ValType::F32,
        wasmtime::ValType::F64 => ValType::F64,
        wasmtime::ValType::V128 => ValType::V128,
        other if other.is_funcref() => ValType::FuncRef,
        _ => ValType::ExternRef,
    }
}

fn extern_type(ty: &wasmtime::ExternType) -> ExternType {
    match ty {
        wasmtime::ExternType::Func(func) => ExternType::Func(FuncSignature::new(
            func.params().map(|ty| from_val_type(&ty)),
            func.results().map(|ty| from_val_type(&ty)),
        )),
        wasmtime::ExternType::Global(global) => ExternType::Global(GlobalSignature {
            content: from_val_type(global.content()),
            mutable: global.mutability() == Mutability::Var,
        }),
        wasmtime::ExternType::Table(table) => ExternType::Table(TableSignature {
            element: from_val_type(&wasmtime::ValType::Ref(table.element().clone())),
            minimum: u64::from(table.minimum()),
            maximum: table.maximum().map(u64::from),
        }),
        wasmtime::ExternType::Memory(memory) => ExternType::Memory(MemorySignature {
            minimum: memory.minimum(),
            maximum: memory.maximum(),
            memory64: memory.is_64(),
            shared: memory.is_shared(),
        }),
        _ => ExternType::Tag,
    }
}
