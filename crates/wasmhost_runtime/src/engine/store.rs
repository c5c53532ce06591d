use wasi_common::WasiCtx;

use crate::registry::HostState;

/// Data attached to every Wasmtime store.
pub(crate) struct WasmtimeStore {
    /// Host-owned state handed to host functions.
    pub(crate) host: HostState,
    /// WASI context. Empty unless the engine was configured with WASI.
    pub(crate) wasi: WasiCtx,
}
