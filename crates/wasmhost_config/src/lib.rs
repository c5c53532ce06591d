use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Name of the host setup. Only used for logging.
    pub name: String,
    /// Plugin module to load.
    pub plugin: PluginConfig,
    /// Engine selection and limits.
    #[serde(default)]
    pub engine: EngineSection,
    /// WASI preview1 environment. WASI is disabled when omitted.
    #[serde(default)]
    pub wasi: Option<WasiSection>,
    /// Host functions returning constant values.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub host_functions: Vec<HostFunctionConfig>,
    /// Host globals bound to global imports.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub host_globals: Vec<HostGlobalConfig>,
    /// Calls issued against the instance, in order.
    /// condition: steps is not empty
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,

    /// Directory where the config file is located.
    /// This is used as a base directory when the plugin or a preopen is a relative path.
    #[serde(skip)]
    config_dir: PathBuf,
}

impl HostConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to open file: {}", e))?;

        let path = path
            .canonicalize()
            .map_err(|e| format!("Failed to canonicalize path: {}", e))?;
        let config_dir = path
            .parent()
            .ok_or_else(|| format!("Failed to get parent directory of path: {}", path.display()))?
            .to_path_buf();
        Self::parse(&text, config_dir)
    }

    /// Parses a config from YAML text. Relative paths are resolved against `config_dir`.
    pub fn parse(text: &str, config_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: HostConfig =
            serde_yaml::from_str(text).map_err(|e| format!("Failed to parse YAML: {}", e))?;
        config.config_dir = config_dir.into();
        config.validate()?;
        Ok(config)
    }

    pub fn plugin_path(&self) -> PathBuf {
        self.resolve_path(&self.plugin.path)
    }

    /// Preopens with their host side resolved against the config directory.
    pub fn resolved_preopens(&self) -> Vec<PreopenConfig> {
        let Some(wasi) = &self.wasi else {
            return vec![];
        };
        wasi.preopens
            .iter()
            .map(|preopen| PreopenConfig {
                host: self.resolve_path(&preopen.host),
                guest: preopen.guest.clone(),
                create: preopen.create,
            })
            .collect()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.config_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err("Name is required in the name field".to_string());
        }

        if self.plugin.path.as_os_str().is_empty() {
            return Err("Plugin path must not be empty".to_string());
        }

        if self.steps.is_empty() {
            return Err("At least one step is required in the steps field".to_string());
        }

        let mut keys = HashSet::new();
        let functions = self.host_functions.iter().map(|f| (&f.module, &f.name));
        let globals = self.host_globals.iter().map(|g| (&g.module, &g.name));
        for (module, name) in functions.chain(globals) {
            if name.is_empty() {
                return Err(format!("Host binding name must not be empty (module {module})"));
            }
            if !keys.insert((module, name)) {
                return Err(format!("Duplicate host binding {module}::{name}"));
            }
        }

        for step in &self.steps {
            match step {
                Step::Call { export, .. } if export.is_empty() => {
                    return Err("Call step requires an export name".to_string());
                }
                Step::TakeString { produce, free } if produce.is_empty() || free.is_empty() => {
                    return Err("take_string step requires both produce and free".to_string());
                }
                _ => {}
            }
        }

        if let Some(wasi) = &self.wasi {
            for preopen in &wasi.preopens {
                if preopen.guest.is_empty() {
                    return Err(format!(
                        "Guest path for preopen {} must not be empty",
                        preopen.host.display()
                    ));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    /// Path to the Wasm binary or text module.
    /// If relative path is specified, it is relative to the directory where the config file is located.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Wasmtime,
    Wasmi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default)]
    pub kind: EngineKind,
    /// Fuel budget per instance. Fuel metering is disabled when omitted.
    #[serde(default)]
    pub fuel: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WasiSection {
    /// Arguments passed to the guest after the program name.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub preopens: Vec<PreopenConfig>,
    /// Capture guest stdout/stderr instead of inheriting the host's.
    #[serde(default)]
    pub capture_output: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreopenConfig {
    /// Directory on the host.
    pub host: PathBuf,
    /// Path the guest sees.
    pub guest: String,
    /// Create the host directory if it does not exist.
    #[serde(default = "preopen_create_default")]
    pub create: bool,
}

fn preopen_create_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTypeName {
    I32,
    I64,
    F32,
    F64,
}

/// A scalar constant, written as `{ i32: 42 }` in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn type_name(&self) -> ValueTypeName {
        match self {
            ConstValue::I32(_) => ValueTypeName::I32,
            ConstValue::I64(_) => ValueTypeName::I64,
            ConstValue::F32(_) => ValueTypeName::F32,
            ConstValue::F64(_) => ValueTypeName::F64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostFunctionConfig {
    pub module: String,
    pub name: String,
    /// Parameter types the guest passes. Values are ignored.
    #[serde(default)]
    pub params: Vec<ValueTypeName>,
    /// Values returned on every call.
    #[serde(default)]
    pub results: Vec<ConstValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostGlobalConfig {
    pub module: String,
    pub name: String,
    pub value: ConstValue,
    #[serde(default)]
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Call an export with scalar arguments.
    Call {
        export: String,
        #[serde(default)]
        args: Vec<ConstValue>,
    },
    /// Fetch a guest-allocated C string and release it.
    TakeString { produce: String, free: String },
}
