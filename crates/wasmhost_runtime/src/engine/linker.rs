use anyhow::{Context as _, Result};
use wasi_common::pipe::WritePipe;
use wasi_common::sync;
use wasmtime::{Engine, Linker};

use super::config::WasiConfig;
use super::store::WasmtimeStore;

/// Import module name of WASI preview1.
pub(crate) const WASIP1_MODULE: &str = "wasi_snapshot_preview1";

/// Linker holding only the WASI preview1 functions. Other imports are bound positionally.
pub(crate) fn wasi_linker(engine: &Engine) -> Result<Linker<WasmtimeStore>> {
    let mut linker: Linker<WasmtimeStore> = Linker::new(engine);
    sync::add_to_linker(&mut linker, |cx: &mut WasmtimeStore| &mut cx.wasi)
        .context("failed to add WASI to linker")?;
    Ok(linker)
}

pub(crate) fn wasi_ctx(wasi_config: Option<&WasiConfig>) -> Result<wasi_common::WasiCtx> {
    let mut builder = sync::WasiCtxBuilder::new();
    let Some(wasi_config) = wasi_config else {
        return Ok(builder.build());
    };

    builder.arg("plugin")?;
    for arg in wasi_config.args.iter() {
        builder.arg(arg)?;
    }
    if wasi_config.inherit_env {
        builder.inherit_env()?;
    }
    if wasi_config.inherit_stdin {
        builder.inherit_stdin();
    }
    if let Some(stdout) = wasi_config.stdout.clone() {
        builder.stdout(Box::new(WritePipe::from_shared(stdout)));
    } else if wasi_config.inherit_stdout {
        builder.inherit_stdout();
    }
    if let Some(stderr) = wasi_config.stderr.clone() {
        builder.stderr(Box::new(WritePipe::from_shared(stderr)));
    } else if wasi_config.inherit_stderr {
        builder.inherit_stderr();
    }

    for preopen in wasi_config.preopens.iter() {
        if preopen.create {
            std::fs::create_dir_all(&preopen.host).with_context(|| {
                format!("failed to create preopen directory {}", preopen.host.display())
            })?;
        }
        tracing::debug!(
            "mapping WASI path {:?} to {}",
            preopen.guest,
            preopen.host.display()
        );
        let file = std::fs::File::open(&preopen.host)
            .with_context(|| format!("failed to open preopen directory {}", preopen.host.display()))?;
        let dir = cap_std::fs::Dir::from_std_file(file);
        builder.preopened_dir(dir, &preopen.guest)?;
    }

    Ok(builder.build())
}
