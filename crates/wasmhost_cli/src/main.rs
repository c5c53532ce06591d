use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use wasmhost_config::{HostConfig, Step};
use wasmhost_runtime::{
    CompiledModule, Engine, EngineConfig, EngineKind, ExternType, HostFunctionRegistry, Instance,
    InstanceOptions, Value, WasiConfig, resolve,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Load WebAssembly plugins and call into them.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the steps of a host config against its plugin.
    Run {
        /// Path to the host config file.
        config: PathBuf,
    },
    /// Print the imports and exports of a plugin.
    Inspect {
        plugin: PathBuf,
        #[arg(long, value_enum, default_value_t = EngineArg::Wasmtime)]
        engine: EngineArg,
    },
    /// Call one export of a plugin that needs no host imports besides WASI.
    Call {
        plugin: PathBuf,
        export: String,
        /// Arguments, parsed according to the export's parameter types.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(long)]
        fuel: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    Wasmtime,
    Wasmi,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Wasmtime => EngineKind::Wasmtime,
            EngineArg::Wasmi => EngineKind::Wasmi,
        }
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "wasmhost_runtime=info,wasmhost_cli=info") };
    }

    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::from_default_env());
    subscriber.try_init()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let host_config = HostConfig::load(&config)
                .map_err(|e| anyhow::anyhow!("Failed to load host config: {}", e))?;
            run(&host_config)
        }
        Command::Inspect { plugin, engine } => inspect(&plugin, engine.into()),
        Command::Call {
            plugin,
            export,
            args,
            fuel,
        } => call(&plugin, &export, &args, fuel),
    }
}

fn run(config: &HostConfig) -> Result<()> {
    let engine_config = EngineConfig::create_from_host_config(config);
    let engine = Engine::new(&engine_config).context("Failed to create engine")?;
    let module = engine
        .load(config.plugin_path())
        .context("Failed to load plugin")?;
    let registry = HostFunctionRegistry::create_from_host_config(config)
        .context("Failed to register host bindings")?;
    let imports = resolve(&module, &registry).context("Failed to resolve imports")?;

    tracing::info!("{} is starting", config.name);
    let mut instance = Instance::with_options(&module, &imports, InstanceOptions::new())
        .context("Failed to instantiate plugin")?;

    for (index, step) in config.steps.iter().enumerate() {
        match step {
            Step::Call { export, args } => {
                let args: Vec<Value> = args.iter().copied().map(Value::from).collect();
                let results = instance
                    .invoke(export, &args)
                    .with_context(|| format!("Step {index} failed"))?;
                tracing::info!("{export}({}) = {}", join(&args), join(&results));
            }
            Step::TakeString { produce, free } => {
                let text = instance
                    .take_string(produce, free)
                    .with_context(|| format!("Step {index} failed"))?;
                tracing::info!("{produce}() = {text:?}");
            }
        }
    }

    if let Some(wasi) = &engine_config.wasi {
        print_captured(wasi);
    }
    tracing::info!("{} finished", config.name);
    instance.destroy();
    Ok(())
}

fn inspect(plugin: &Path, kind: EngineKind) -> Result<()> {
    let engine = Engine::new(&EngineConfig::default().with_kind(kind))?;
    let module = engine.load(plugin).context("Failed to load plugin")?;
    print_module(&module);
    Ok(())
}

fn call(plugin: &Path, export: &str, args: &[String], fuel: Option<u64>) -> Result<()> {
    let mut config = EngineConfig::default().with_wasi(WasiConfig::default());
    if let Some(fuel) = fuel {
        config = config.with_fuel(fuel);
    }
    let engine = Engine::new(&config)?;
    let module = engine.load(plugin).context("Failed to load plugin")?;
    let mut instance = module
        .instantiate(&HostFunctionRegistry::new())
        .context("Failed to instantiate plugin")?;

    let handle = instance.find_export(export)?;
    let Some(signature) = handle.signature() else {
        bail!("Export {export} is not a function");
    };
    if signature.params().len() != args.len() {
        bail!(
            "Export {export} takes {} arguments, {} given",
            signature.params().len(),
            args.len()
        );
    }
    let args = signature
        .params()
        .iter()
        .zip(args)
        .map(|(ty, text)| Value::parse(*ty, text).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let results = instance.call(&handle, &args)?;
    for value in results {
        println!("{value}");
    }
    Ok(())
}

fn print_module(module: &CompiledModule) {
    println!("imports:");
    for import in module.imports() {
        println!("  {import}");
    }
    println!("exports:");
    for export in module.exports() {
        match &export.ty {
            ExternType::Func(signature) if !signature.is_scalar() => {
                println!("  {export} (not callable from the host)")
            }
            _ => println!("  {export}"),
        }
    }
    if let Some(start) = module.metadata().start {
        println!("start function: {start}");
    }
    for name in module.metadata().custom_sections.iter() {
        println!("custom section: {name}");
    }
}

fn print_captured(wasi: &WasiConfig) {
    let streams = [("stdout", &wasi.stdout), ("stderr", &wasi.stderr)];
    for (name, buffer) in streams {
        let Some(buffer) = buffer else { continue };
        if let Ok(bytes) = buffer.read() {
            tracing::info!("captured {name}: {:?}", String::from_utf8_lossy(&bytes));
        }
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
