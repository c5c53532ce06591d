use wasmhost_runtime::{
    CallError, CompiledModule, Engine, EngineConfig, Error, GuestAddress, HostFunctionRegistry,
    Instance, InstanceOptions, MemoryError, Value, PAGE_SIZE,
};

/// Guest with a bump allocator that grows memory on demand and counts live buffers.
const PLUGIN_WAT: &str = r#"
(module
  (memory (export "memory") 1 16)

  (global $heap (mut i32) (i32.const 1024))
  (global $live (mut i32) (i32.const 0))
  (global $pending (mut i32) (i32.const 0))

  (data (i32.const 16) "Hello from the plugin!\00")
  (data (i32.const 48) "\ff\fe\00")

  (func $alloc (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (block $done
      (loop $grow
        (br_if $done
          (i32.le_u
            (i32.add (local.get $ptr) (local.get $size))
            (i32.mul (memory.size) (i32.const 65536))))
        (if (i32.eq (memory.grow (i32.const 1)) (i32.const -1))
          (then unreachable))
        (br $grow)))
    (global.set $heap (i32.add (local.get $ptr) (local.get $size)))
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (local.get $ptr))

  (func $free (export "free") (param i32)
    (global.set $live (i32.sub (global.get $live) (i32.const 1))))

  (func (export "free_trapping") (param i32)
    unreachable)

  ;; Hands out the first byte past the end of memory.
  (func (export "alloc_past_end") (param i32) (result i32)
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (i32.mul (memory.size) (i32.const 65536)))

  (func $copy_out (param $src i32) (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (call $alloc (local.get $len)))
    (memory.copy (local.get $ptr) (local.get $src) (local.get $len))
    (local.get $ptr))

  (func (export "get_heap_allocated_string") (result i32)
    (call $copy_out (i32.const 16) (i32.const 23)))

  (func (export "get_invalid_string") (result i32)
    (call $copy_out (i32.const 48) (i32.const 3)))

  (func (export "free_heap_allocated_string") (param i32)
    (call $free (local.get 0)))

  (func (export "set_pending") (param i32)
    (global.set $pending (local.get 0)))

  (func (export "take_pending") (result i32)
    (global.get $pending))

  (func (export "live_allocations") (result i32)
    (global.get $live))

  (func (export "nothing"))

  (func (export "strlen") (param $p i32) (result i32)
    (local $n i32)
    (block $done
      (loop $next
        (br_if $done
          (i32.eqz (i32.load8_u (i32.add (local.get $p) (local.get $n)))))
        (local.set $n (i32.add (local.get $n) (i32.const 1)))
        (br $next)))
    (local.get $n))
)
"#;

fn plugin() -> CompiledModule {
    Engine::new(&EngineConfig::default())
        .unwrap()
        .compile(PLUGIN_WAT)
        .unwrap()
}

fn live(instance: &mut Instance) -> i32 {
    instance.invoke("live_allocations", &[]).unwrap()[0]
        .as_i32()
        .unwrap()
}

#[test]
fn take_string_copies_and_frees() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    let text = instance.take_string("get_heap_allocated_string", "free_heap_allocated_string")?;
    assert_eq!(text, "Hello from the plugin!");
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn take_string_frees_even_when_decoding_fails() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    let err = instance
        .take_string("get_invalid_string", "free_heap_allocated_string")
        .unwrap_err();
    assert!(
        matches!(err, Error::Memory(MemoryError::InvalidUtf8 { .. })),
        "{err}"
    );
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn producer_must_return_one_address() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    assert!(matches!(
        instance.take_string("nothing", "free"),
        Err(Error::UnexpectedResult { .. })
    ));
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn string_round_trip() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;

    let address = instance.put_string("alloc", "hello")?;
    assert_eq!(instance.read_cstring(address)?, "hello");
    assert_eq!(instance.invoke("strlen", &[Value::I32(address.as_i32())])?, vec![Value::I32(5)]);

    instance.invoke("set_pending", &[Value::I32(address.as_i32())])?;
    let text = instance.take_string("take_pending", "free")?;
    assert_eq!(text, "hello");
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn string_round_trip_larger_than_a_page() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    assert_eq!(instance.memory_size()?, PAGE_SIZE);

    let text = "0123456789".repeat(10_000);
    let address = instance.put_string("alloc", &text)?;
    // The guest grew its memory while allocating.
    assert!(instance.memory_size()? >= address.offset() + text.len() + 1);
    assert!(instance.memory_size()? > PAGE_SIZE);

    assert_eq!(
        instance.invoke("strlen", &[Value::I32(address.as_i32())])?,
        vec![Value::I32(text.len() as i32)]
    );
    instance.invoke("set_pending", &[Value::I32(address.as_i32())])?;
    assert_eq!(instance.take_string("take_pending", "free")?, text);
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn tracked_allocations_reject_double_free() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate_with(
        &HostFunctionRegistry::new(),
        InstanceOptions::new().track_allocations(true),
    )?;

    let address = instance.put_string("alloc", "once")?;
    assert_eq!(instance.live_allocations(), Some(1));
    instance.free_guest("free", address)?;
    assert_eq!(instance.live_allocations(), Some(0));

    assert!(matches!(
        instance.free_guest("free", address),
        Err(Error::Memory(MemoryError::UnknownAllocation(a))) if a == address
    ));
    assert!(matches!(
        instance.free_guest("free", GuestAddress(8)),
        Err(Error::Memory(MemoryError::UnknownAllocation(_)))
    ));
    // The guest saw exactly one free.
    assert_eq!(live(&mut instance), 0);

    instance.take_string("get_heap_allocated_string", "free_heap_allocated_string")?;
    assert_eq!(instance.live_allocations(), Some(0));
    Ok(())
}

#[test]
fn failed_free_keeps_the_allocation_tracked() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate_with(
        &HostFunctionRegistry::new(),
        InstanceOptions::new().track_allocations(true),
    )?;
    let address = instance.put_string("alloc", "retry me")?;

    assert!(matches!(
        instance.free_guest("does_not_exist", address),
        Err(Error::Call(CallError::NotFound(_)))
    ));
    assert!(matches!(
        instance.free_guest("free_trapping", address),
        Err(Error::Call(CallError::Trap { .. }))
    ));
    assert_eq!(instance.live_allocations(), Some(1));
    assert_eq!(live(&mut instance), 1);

    instance.free_guest("free", address)?;
    assert_eq!(instance.live_allocations(), Some(0));
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn unwritable_buffer_is_reported_with_its_address() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate_with(
        &HostFunctionRegistry::new(),
        InstanceOptions::new().track_allocations(true),
    )?;
    let end = GuestAddress(instance.memory_size()? as u32);

    let err = instance.put_string("alloc_past_end", "nowhere").unwrap_err();
    let address = match err {
        Error::Memory(MemoryError::OutOfBounds { address, len: 8, .. }) => address,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(address, end);
    assert_eq!(instance.live_allocations(), Some(0));

    // The guest still counts the buffer; the caller releases it.
    assert_eq!(live(&mut instance), 1);
    instance.invoke("free", &[Value::I32(address.as_i32())])?;
    assert_eq!(live(&mut instance), 0);
    Ok(())
}

#[test]
fn put_string_needs_memory_before_allocating() -> anyhow::Result<()> {
    let engine = Engine::new(&EngineConfig::default())?;
    let module = engine.compile(
        r#"(module
             (global $calls (mut i32) (i32.const 0))
             (func (export "alloc") (param i32) (result i32)
               (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
               (i32.const 0))
             (func (export "calls") (result i32) (global.get $calls)))"#,
    )?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    assert!(matches!(
        instance.put_string("alloc", "x"),
        Err(Error::Memory(MemoryError::MissingMemory(_)))
    ));
    assert_eq!(instance.invoke("calls", &[])?, vec![Value::I32(0)]);
    Ok(())
}

#[test]
fn untracked_instance_forwards_every_free() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    assert_eq!(instance.live_allocations(), None);
    instance.free_guest("free", GuestAddress(8))?;
    assert_eq!(live(&mut instance), -1);
    Ok(())
}

#[test]
fn growth_preserves_contents() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    instance.write_bytes(GuestAddress(100), b"persist")?;

    assert_eq!(instance.grow_memory(2)?, 1);
    assert_eq!(instance.memory_size()?, 3 * PAGE_SIZE);
    assert_eq!(instance.read_bytes(GuestAddress(100), 7)?, b"persist");
    assert_eq!(instance.read_cstring(GuestAddress(16))?, "Hello from the plugin!");

    // The new pages are zeroed and addressable.
    let tail = GuestAddress((3 * PAGE_SIZE - 4) as u32);
    assert_eq!(instance.read_bytes(tail, 4)?, vec![0; 4]);

    assert!(matches!(
        instance.grow_memory(100),
        Err(MemoryError::GrowFailed { delta: 100, .. })
    ));
    assert_eq!(instance.memory_size()?, 3 * PAGE_SIZE);
    Ok(())
}

#[test]
fn accesses_past_the_end_fail() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    let size = instance.memory_size()?;

    assert!(matches!(
        instance.read_bytes(GuestAddress(size as u32 - 2), 4),
        Err(MemoryError::OutOfBounds { len: 4, .. })
    ));
    assert!(matches!(
        instance.write_bytes(GuestAddress(size as u32), b"x"),
        Err(MemoryError::OutOfBounds { .. })
    ));

    instance.write_bytes(GuestAddress(size as u32 - 3), b"end")?;
    assert!(matches!(
        instance.read_cstring(GuestAddress(size as u32 - 3)),
        Err(MemoryError::UnterminatedString { .. })
    ));
    Ok(())
}

#[test]
fn view_sees_guest_writes() -> anyhow::Result<()> {
    let mut instance = plugin().instantiate(&HostFunctionRegistry::new())?;
    let first = instance.put_string("alloc", "first")?;
    let second = instance.put_string("alloc", "second")?;

    let view = instance.memory()?;
    assert_eq!(view.read_cstring(first)?, "first");
    assert_eq!(view.read_cstring_bytes(second)?, b"second");
    assert_eq!(&view.as_slice()[16..21], b"Hello");
    Ok(())
}

#[test]
fn instances_do_not_share_memory() -> anyhow::Result<()> {
    let module = plugin();
    let mut first = module.instantiate(&HostFunctionRegistry::new())?;
    let mut second = module.instantiate(&HostFunctionRegistry::new())?;

    first.write_bytes(GuestAddress(200), b"mine")?;
    assert_eq!(second.read_bytes(GuestAddress(200), 4)?, vec![0; 4]);
    first.destroy();
    assert_eq!(second.read_cstring(GuestAddress(16))?, "Hello from the plugin!");
    Ok(())
}

#[test]
fn module_without_memory_reports_missing_memory() -> anyhow::Result<()> {
    let engine = Engine::new(&EngineConfig::default())?;
    let module = engine.compile(r#"(module (func (export "f")))"#)?;
    let mut instance = module.instantiate(&HostFunctionRegistry::new())?;
    assert!(matches!(instance.memory(), Err(MemoryError::MissingMemory(_))));
    assert!(matches!(instance.grow_memory(1), Err(MemoryError::MissingMemory(_))));
    Ok(())
}
