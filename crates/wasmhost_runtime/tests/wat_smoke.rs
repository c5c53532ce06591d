use std::sync::{Arc, RwLock};

use wasmhost_runtime::{
    CallError, Engine, EngineConfig, Error, ExternKind, GuestAddress, HostFunctionRegistry,
    ImportError, InstantiationError, LoadError, Preopen, Value, WasiConfig,
};

const SUM_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global (export "answer") i32 (i32.const 42))
  (func (export "sum") (param i32 i32) (result i32)
    (i32.add (local.get 0) (local.get 1)))
)
"#;

fn engine() -> Engine {
    Engine::new(&EngineConfig::default()).unwrap()
}

#[test]
fn wat_sum_returns_result() -> anyhow::Result<()> {
    let module = engine().compile(SUM_WAT)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;

    let sum = instance.find_export("sum")?;
    assert_eq!(sum.signature().map(|s| s.to_string()).as_deref(), Some("(i32, i32) -> (i32)"));
    assert_eq!(instance.call(&sum, &[Value::I32(7), Value::I32(3)])?, vec![Value::I32(10)]);
    assert_eq!(instance.call(&sum, &[Value::I32(-1), Value::I32(1)])?, vec![Value::I32(0)]);
    Ok(())
}

#[test]
fn export_listing_matches_module() -> anyhow::Result<()> {
    let module = engine().compile(SUM_WAT)?;
    let instance = module.instantiate(&HostFunctionRegistry::new())?;

    assert_eq!(instance.export_count(), module.exports().len());
    assert_eq!(instance.export_count(), 3);
    let kinds: Vec<(&str, ExternKind)> = instance
        .exports()
        .map(|export| (export.name.as_str(), export.kind()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("memory", ExternKind::Memory),
            ("answer", ExternKind::Global),
            ("sum", ExternKind::Func),
        ]
    );
    Ok(())
}

#[test]
fn loader_reports_missing_and_invalid_modules() -> anyhow::Result<()> {
    let engine = engine();
    assert!(matches!(
        engine.load("/nonexistent/plugin.wasm"),
        Err(LoadError::NotFound { .. })
    ));
    assert!(matches!(
        engine.compile(vec![0u8, 1, 2, 3]),
        Err(LoadError::InvalidBinary(_))
    ));
    assert!(matches!(
        engine.compile(b"\0asm\x01\0\0\0\x01".to_vec()),
        Err(LoadError::InvalidBinary(_))
    ));

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plugin.wat");
    std::fs::write(&path, SUM_WAT)?;
    let module = engine.load(&path)?;
    assert_eq!(module.exports().len(), 3);
    Ok(())
}

#[test]
fn start_function_runs_before_exports() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (global $ready (mut i32) (i32.const 0))
  (func $init (global.set $ready (i32.const 1)))
  (start $init)
  (func (export "ready") (result i32) (global.get $ready))
)
"#;
    let module = engine().compile(wat_src)?;
    assert!(module.metadata().has_start());
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    assert_eq!(instance.invoke("ready", &[])?, vec![Value::I32(1)]);
    Ok(())
}

#[test]
fn start_trap_returns_no_instance() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (func $init unreachable)
  (start $init)
  (func (export "never") (result i32) (i32.const 1))
)
"#;
    let module = engine().compile(wat_src)?;
    let err = module.instantiate(&HostFunctionRegistry::new()).unwrap_err();
    assert!(
        matches!(err, Error::Instantiation(InstantiationError::StartTrap(_))),
        "{err}"
    );
    Ok(())
}

#[test]
fn unknown_export_is_not_found() -> anyhow::Result<()> {
    let module = engine().compile(SUM_WAT)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    assert!(matches!(
        instance.find_export("does_not_exist"),
        Err(CallError::NotFound(ref name)) if name == "does_not_exist"
    ));
    assert!(matches!(
        instance.invoke("Sum", &[Value::I32(1), Value::I32(2)]),
        Err(CallError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn trap_leaves_instance_usable() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (global $calls (mut i32) (i32.const 0))
  (func (export "boom")
    (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
    unreachable)
  (func (export "calls") (result i32) (global.get $calls))
)
"#;
    let module = engine().compile(wat_src)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;

    let err = instance.invoke("boom", &[]).unwrap_err();
    assert!(matches!(err, CallError::Trap { ref name, .. } if name == "boom"), "{err}");
    assert!(instance.invoke("boom", &[]).is_err());
    assert_eq!(instance.invoke("calls", &[])?, vec![Value::I32(2)]);
    Ok(())
}

#[test]
fn fuel_exhaustion_traps_and_can_be_refilled() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (func (export "spin") (loop $forever (br $forever)))
  (func (export "sum") (param i32 i32) (result i32)
    (i32.add (local.get 0) (local.get 1)))
)
"#;
    let engine = Engine::new(&EngineConfig::default().with_fuel(10_000))?;
    let module = engine.compile(wat_src)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;

    assert!(matches!(instance.invoke("spin", &[]), Err(CallError::Trap { .. })));

    instance.set_fuel(10_000).map_err(anyhow::Error::msg)?;
    assert_eq!(instance.invoke("sum", &[Value::I32(2), Value::I32(2)])?, vec![Value::I32(4)]);
    assert!(instance.remaining_fuel().is_some_and(|fuel| fuel < 10_000));
    Ok(())
}

#[test]
fn compiled_module_is_shared_across_threads() -> anyhow::Result<()> {
    let module = engine().compile(SUM_WAT)?;
    let registry = HostFunctionRegistry::new();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let module = &module;
                let registry = &registry;
                scope.spawn(move || {
                    let mut instance = module.instantiate(registry).unwrap();
                    instance
                        .invoke("sum", &[Value::I32(i), Value::I32(100)])
                        .unwrap()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), vec![Value::I32(i as i32 + 100)]);
        }
    });
    Ok(())
}

#[test]
fn wasip1_hello_world_stdout_matches() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))

  (memory (export "memory") 1)

  ;; iovec[0] = { ptr=8, len=12 }
  (data (i32.const 8) "hello world\n")

  (func (export "test_print")
    (i32.store (i32.const 0) (i32.const 8))
    (i32.store (i32.const 4) (i32.const 12))
    ;; fd_write(fd=1, iovs=0, iovs_len=1, nwritten=20)
    (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 20))
    drop)
)
"#;

    // Without WASI the import has nothing to bind to.
    let module = engine().compile(wat_src)?;
    let err = module.instantiate(&HostFunctionRegistry::new()).unwrap_err();
    assert!(matches!(err, Error::Import(ImportError::Unresolved { .. })), "{err}");

    let stdout = Arc::new(RwLock::new(Vec::<u8>::new()));
    let wasi_config = WasiConfig {
        stdout: Some(stdout.clone()),
        ..WasiConfig::default()
    };
    let engine = Engine::new(&EngineConfig::default().with_wasi(wasi_config))?;
    let module = engine.compile(wat_src)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    instance.invoke("test_print", &[])?;

    let stdout = stdout.read().unwrap();
    assert_eq!(std::str::from_utf8(&stdout)?, "hello world\n");
    Ok(())
}

#[test]
fn wasip1_preopen_maps_guest_path_to_host_dir() -> anyhow::Result<()> {
    let wat_src = r#"
(module
  (import "wasi_snapshot_preview1" "fd_prestat_get"
    (func $fd_prestat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_prestat_dir_name"
    (func $fd_prestat_dir_name (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))

  (memory (export "memory") 1)

  (data (i32.const 100) "greeting.txt")
  (data (i32.const 200) "hi from wasm\n")

  ;; Writes the name of preopen fd 3 to offset 64.
  (func (export "preopen_name") (result i32)
    (local $errno i32)
    (local.set $errno (call $fd_prestat_get (i32.const 3) (i32.const 8)))
    (if (local.get $errno) (then (return (local.get $errno))))
    (call $fd_prestat_dir_name (i32.const 3) (i32.const 64) (i32.load (i32.const 12))))

  (func (export "write_greeting") (result i32)
    (local $errno i32)
    ;; path_open(dirfd=3, dirflags=0, path, len, oflags=CREAT, rights=FD_WRITE, 0, 0, fd_out=300)
    (local.set $errno
      (call $path_open (i32.const 3) (i32.const 0) (i32.const 100) (i32.const 12)
        (i32.const 1) (i64.const 64) (i64.const 0) (i32.const 0) (i32.const 300)))
    (if (local.get $errno) (then (return (local.get $errno))))
    (i32.store (i32.const 0) (i32.const 200))
    (i32.store (i32.const 4) (i32.const 13))
    (call $fd_write (i32.load (i32.const 300)) (i32.const 0) (i32.const 1) (i32.const 304)))
)
"#;

    let dir = tempfile::tempdir()?;
    let host = dir.path().join("data");
    assert!(!host.exists());

    let wasi_config = WasiConfig {
        preopens: vec![Preopen {
            host: host.clone(),
            guest: "data".to_string(),
            create: true,
        }],
        ..WasiConfig::default()
    };
    let engine = Engine::new(&EngineConfig::default().with_wasi(wasi_config))?;
    let module = engine.compile(wat_src)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    assert!(host.is_dir());

    assert_eq!(instance.invoke("preopen_name", &[])?, vec![Value::I32(0)]);
    assert_eq!(instance.read_bytes(GuestAddress(12), 4)?, 4u32.to_le_bytes());
    assert_eq!(instance.read_bytes(GuestAddress(64), 4)?, b"data");

    assert_eq!(instance.invoke("write_greeting", &[])?, vec![Value::I32(0)]);
    assert_eq!(std::fs::read_to_string(host.join("greeting.txt"))?, "hi from wasm\n");
    Ok(())
}

#[cfg(not(feature = "wasmi"))]
#[test]
fn wasmi_engine_requires_feature() {
    use wasmhost_runtime::{EngineError, EngineKind};

    let err = Engine::new(&EngineConfig::default().with_kind(EngineKind::Wasmi)).unwrap_err();
    assert!(matches!(err, EngineError::Unavailable("wasmi")));
}
