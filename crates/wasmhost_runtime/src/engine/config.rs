use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use wasmhost_config::HostConfig;

pub use wasmhost_config::EngineKind;

#[derive(Debug, Clone)]
pub struct Preopen {
    /// Directory on the host.
    pub host: PathBuf,
    /// Path under which the guest sees the directory.
    pub guest: String,
    /// Create the host directory if it is missing.
    pub create: bool,
}

#[derive(Clone)]
pub struct WasiConfig {
    pub args: Vec<String>,
    pub preopens: Vec<Preopen>,
    pub inherit_stdin: bool,
    pub inherit_stdout: bool,
    pub inherit_stderr: bool,
    pub inherit_env: bool,
    /// Capture stdout into this buffer when set.
    pub stdout: Option<Arc<RwLock<Vec<u8>>>>,
    /// Capture stderr into this buffer when set.
    pub stderr: Option<Arc<RwLock<Vec<u8>>>>,
}

impl WasiConfig {
    /// Returns `None` when the host config does not enable WASI.
    pub fn create_from_host_config(host_config: &HostConfig) -> Option<Self> {
        let wasi = host_config.wasi.as_ref()?;
        let capture = || Some(Arc::new(RwLock::new(Vec::new())));
        Some(Self {
            args: wasi.args.clone(),
            preopens: host_config
                .resolved_preopens()
                .into_iter()
                .map(|preopen| Preopen {
                    host: preopen.host,
                    guest: preopen.guest,
                    create: preopen.create,
                })
                .collect(),
            stdout: if wasi.capture_output { capture() } else { None },
            stderr: if wasi.capture_output { capture() } else { None },
            ..Self::default()
        })
    }
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            args: vec![],
            preopens: vec![],
            inherit_stdin: false,
            inherit_stdout: true,
            inherit_stderr: true,
            inherit_env: false,
            stdout: None,
            stderr: None,
        }
    }
}

impl std::fmt::Debug for WasiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiConfig")
            .field("args", &self.args)
            .field("preopens", &self.preopens)
            .field("capture_stdout", &self.stdout.is_some())
            .field("capture_stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Default fuel budget for new instances. Enables fuel metering when set.
    pub fuel: Option<u64>,
    /// WASI preview1 environment offered to guests. Wasmtime only.
    pub wasi: Option<WasiConfig>,
}

impl EngineConfig {
    pub fn create_from_host_config(host_config: &HostConfig) -> Self {
        Self {
            kind: host_config.engine.kind,
            fuel: host_config.engine.fuel,
            wasi: WasiConfig::create_from_host_config(host_config),
        }
    }

    pub fn with_kind(mut self, kind: EngineKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_wasi(mut self, wasi: WasiConfig) -> Self {
        self.wasi = Some(wasi);
        self
    }
}
