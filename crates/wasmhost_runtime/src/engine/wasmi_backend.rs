use std::sync::Arc;

use wasmi::core::{Pages, F32, F64};
use wasmi::{
    Caller, Extern, Func, FuncType, Global, Linker, Memory, MemoryType, Module, Mutability,
    Store, Val,
};

use super::config::EngineConfig;
use super::{Backend, BackendInstance, BackendModule, CompiledParts, InstanceSetup};
use crate::error::{EngineError, ImportError, InstantiationError};
use crate::registry::{HostCallContext, HostFunction, HostState};
use crate::resolver::{ResolvedBinding, ResolvedImports};
use crate::types::{
    ExportDescriptor, ExternType, FuncSignature, GlobalSignature, ImportDescriptor,
    MemorySignature, TableSignature, ValType, Value,
};
use crate::DEFAULT_MEMORY;

pub(crate) struct WasmiBackend {
    engine: wasmi::Engine,
}

impl WasmiBackend {
    pub(crate) fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.wasi.is_some() {
            return Err(EngineError::Unsupported("WASI", "wasmi"));
        }
        let mut wasmi_config = wasmi::Config::default();
        wasmi_config.consume_fuel(config.fuel.is_some());
        Ok(Self {
            engine: wasmi::Engine::new(&wasmi_config),
        })
    }
}

impl Backend for WasmiBackend {
    fn provides(&self, _namespace: &str) -> bool {
        false
    }

    fn compile(&self, wasm: &[u8]) -> Result<CompiledParts, String> {
        let module = Module::new(&self.engine, wasm).map_err(|e| e.to_string())?;
        let imports = module
            .imports()
            .map(|import| ImportDescriptor {
                module: import.module().to_string(),
                name: import.name().to_string(),
                ty: extern_type(import.ty()),
            })
            .collect();
        let exports = module
            .exports()
            .map(|export| ExportDescriptor {
                name: export.name().to_string(),
                ty: extern_type(export.ty()),
            })
            .collect();
        Ok(CompiledParts {
            module: Arc::new(WasmiModule {
                engine: self.engine.clone(),
                module,
            }),
            imports,
            exports,
        })
    }
}

struct WasmiModule {
    engine: wasmi::Engine,
    module: Module,
}

impl BackendModule for WasmiModule {
    fn instantiate(
        &self,
        imports: &ResolvedImports,
        setup: InstanceSetup,
    ) -> Result<Box<dyn BackendInstance>, InstantiationError> {
        let engine_error = |e: &dyn std::fmt::Display| InstantiationError::Engine(e.to_string());

        let mut store = Store::new(&self.engine, setup.state);
        if let Some(fuel) = setup.fuel {
            store.set_fuel(fuel).map_err(|e| engine_error(&e))?;
        }

        let mut linker = Linker::<HostState>::new(&self.engine);
        for import in imports {
            let descriptor = &import.descriptor;
            let ext: Extern = match &import.binding {
                ResolvedBinding::Func(func) => host_func(&mut store, func)?.into(),
                ResolvedBinding::Global {
                    signature, value, ..
                } => {
                    let mutability = if signature.mutable {
                        Mutability::Var
                    } else {
                        Mutability::Const
                    };
                    Global::new(&mut store, to_val(value), mutability).into()
                }
                ResolvedBinding::Memory(signature) => {
                    let pages = |n: u64| {
                        u32::try_from(n).map_err(|_| {
                            InstantiationError::Engine(format!(
                                "memory limit of {n} pages is out of range"
                            ))
                        })
                    };
                    let maximum = signature.maximum.map(pages).transpose()?;
                    let ty = MemoryType::new(pages(signature.minimum)?, maximum)
                        .map_err(|e| engine_error(&e))?;
                    Memory::new(&mut store, ty)
                        .map_err(|e| engine_error(&e))?
                        .into()
                }
                ResolvedBinding::Engine => {
                    return Err(ImportError::Unresolved {
                        module: descriptor.module.clone(),
                        name: descriptor.name.clone(),
                    }
                    .into());
                }
            };
            linker
                .define(&descriptor.module, &descriptor.name, ext)
                .map_err(|e| engine_error(&e))?;
        }

        let instance = linker
            .instantiate(&mut store, &self.module)
            .and_then(|pre| pre.start(&mut store))
            .map_err(|e| {
                if e.as_trap_code().is_some() || setup.has_start {
                    InstantiationError::StartTrap(e.to_string())
                } else {
                    InstantiationError::Engine(e.to_string())
                }
            })?;

        Ok(Box::new(WasmiInstance { instance, store }))
    }
}

struct WasmiInstance {
    instance: wasmi::Instance,
    store: Store<HostState>,
}

impl BackendInstance for WasmiInstance {
    fn call(&mut self, name: &str, args: &[Value], results: &[ValType]) -> Result<Vec<Value>, String> {
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| format!("export `{name}` is not a function"))?;
        let params: Vec<Val> = args.iter().map(to_val).collect();
        let mut out: Vec<Val> = results.iter().map(|ty| zero_val(*ty)).collect();
        func.call(&mut self.store, &params, &mut out)
            .map_err(|e| e.to_string())?;
        out.iter().map(from_val).collect()
    }

    fn memory(&mut self, name: &str) -> Option<&mut [u8]> {
        let memory = self.instance.get_memory(&self.store, name)?;
        Some(memory.data_mut(&mut self.store))
    }

    fn grow_memory(&mut self, name: &str, delta: u64) -> Option<Result<u64, String>> {
        let memory = self.instance.get_memory(&self.store, name)?;
        let grown = u32::try_from(delta)
            .map_err(|_| format!("cannot grow by {delta} pages"))
            .and_then(|delta| memory.grow(&mut self.store, delta).map_err(|e| e.to_string()))
            .map(u64::from);
        Some(grown)
    }

    fn state(&self) -> &HostState {
        self.store.data()
    }

    fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    fn set_fuel(&mut self, fuel: u64) -> Result<(), String> {
        self.store.set_fuel(fuel).map_err(|e| e.to_string())
    }

    fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}

fn host_func(store: &mut Store<HostState>, func: &HostFunction) -> Result<Func, InstantiationError> {
    let signature = func.signature();
    let types = |list: &[ValType]| {
        list.iter()
            .map(|ty| {
                to_val_type(*ty).ok_or_else(|| {
                    InstantiationError::Engine(format!("{ty} is not supported by the wasmi engine"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
    };
    let ty = FuncType::new(types(signature.params())?, types(signature.results())?);
    let func = func.clone();
    Ok(Func::new(
        store,
        ty,
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let args = params
                .iter()
                .map(from_val)
                .collect::<Result<Vec<_>, _>>()
                .map_err(wasmi::Error::new)?;
            let memory = caller
                .get_export(DEFAULT_MEMORY)
                .and_then(Extern::into_memory);
            let values = match memory {
                Some(memory) => {
                    let (bytes, state) = memory.data_and_store_mut(&mut caller);
                    func.invoke(&mut HostCallContext::new(Some(bytes), state), &args)
                }
                None => func.invoke(&mut HostCallContext::new(None, caller.data_mut()), &args),
            }
            .map_err(|trap| wasmi::Error::new(trap.to_string()))?;
            for (slot, value) in results.iter_mut().zip(&values) {
                *slot = to_val(value);
            }
            Ok(())
        },
    ))
}

fn to_val(value: &Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(*v),
        Value::I64(v) => Val::I64(*v),
        Value::F32(v) => Val::F32(F32::from_bits(v.to_bits())),
        Value::F64(v) => Val::F64(F64::from_bits(v.to_bits())),
    }
}

fn from_val(val: &Val) -> Result<Value, String> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(v) => Ok(Value::F32(f32::from_bits(v.to_bits()))),
        Val::F64(v) => Ok(Value::F64(f64::from_bits(v.to_bits()))),
        other => Err(format!("non-scalar value {other:?} cannot cross the host boundary")),
    }
}

fn zero_val(ty: ValType) -> Val {
    match Value::zero(ty) {
        Some(value) => to_val(&value),
        None => Val::I32(0),
    }
}

fn to_val_type(ty: ValType) -> Option<wasmi::core::ValType> {
    match ty {
        ValType::I32 => Some(wasmi::core::ValType::I32),
        ValType::I64 => Some(wasmi::core::ValType::I64),
        ValType::F32 => Some(wasmi::core::ValType::F32),
        ValType::F64 => Some(wasmi::core::ValType::F64),
        ValType::FuncRef => Some(wasmi::core::ValType::FuncRef),
        ValType::ExternRef => Some(wasmi::core::ValType::ExternRef),
        ValType::V128 => None,
    }
}

fn from_val_type(ty: wasmi::core::ValType) -> ValType {
    match ty {
        wasmi::core::ValType::I32 => ValType::I32,
        wasmi::core::ValType::I64 => ValType::I64,
        wasmi::core::ValType::F32 => ValType::F32,
        wasmi::core::ValType::F64 => ValType::F64,
        wasmi::core::ValType::FuncRef => ValType::FuncRef,
        wasmi::core::ValType::ExternRef => ValType::ExternRef,
    }
}

fn page_count(pages: Pages) -> u64 {
    u64::from(u32::from(pages))
}

fn extern_type(ty: &wasmi::ExternType) -> ExternType {
    match ty {
        wasmi::ExternType::Func(func) => ExternType::Func(FuncSignature::new(
            func.params().iter().copied().map(from_val_type),
            func.results().iter().copied().map(from_val_type),
        )),
        wasmi::ExternType::Global(global) => ExternType::Global(GlobalSignature {
            content: from_val_type(global.content()),
            mutable: global.mutability() == Mutability::Var,
        }),
        wasmi::ExternType::Table(table) => ExternType::Table(TableSignature {
            element: from_val_type(table.element()),
            minimum: u64::from(table.minimum()),
            maximum: table.maximum().map(u64::from),
        }),
        wasmi::ExternType::Memory(memory) => ExternType::Memory(MemorySignature {
            minimum: page_count(memory.initial_pages()),
            maximum: memory.maximum_pages().map(page_count),
            memory64: false,
            shared: false,
        }),
    }
}
