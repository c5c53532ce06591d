use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ExternKind, GuestAddress};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read module `{}`: {source}", path.display())]
    NotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid WebAssembly module: {0}")]
    InvalidBinary(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("host binding `{module}::{name}` is already registered")]
    DuplicateBinding { module: String, name: String },
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unresolved import `{module}::{name}`")]
    Unresolved { module: String, name: String },

    #[error("import `{module}::{name}` expects {expected}, but the host provides {found}")]
    SignatureMismatch {
        module: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("import `{module}::{name}` of kind {kind} is not supported")]
    UnsupportedKind {
        module: String,
        name: String,
        kind: ExternKind,
    },

    #[error("module declares {expected} imports, but {resolved} were resolved")]
    CountMismatch { expected: usize, resolved: usize },

    #[error("resolved import #{index} is `{found}`, but the module declares `{expected}`")]
    OrderMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("trap during instantiation: {0}")]
    StartTrap(String),

    #[error("engine failed to instantiate module: {0}")]
    Engine(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("export `{0}` not found")]
    NotFound(String),

    #[error("export `{name}` expects {expected}, but was called with {found}")]
    SignatureMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("export `{name}` is a {kind}, not a function")]
    NotCallable { name: String, kind: ExternKind },

    #[error("export `{name}` has signature {signature} with non-scalar types")]
    UnsupportedSignature { name: String, signature: String },

    #[error("handle for `{0}` belongs to a different instance")]
    ForeignHandle(String),

    #[error("guest trapped in `{name}`: {message}")]
    Trap { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("access of {len} bytes at {address} is out of bounds (memory size {size})")]
    OutOfBounds {
        address: GuestAddress,
        len: usize,
        size: usize,
    },

    #[error("string at {address} is not terminated before the end of memory")]
    UnterminatedString { address: GuestAddress },

    #[error("string at {address} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        address: GuestAddress,
        source: std::string::FromUtf8Error,
    },

    #[error("instance has no exported memory `{0}`")]
    MissingMemory(String),

    #[error("failed to grow memory `{name}` by {delta} pages: {message}")]
    GrowFailed {
        name: String,
        delta: u64,
        message: String,
    },

    #[error("address {0} was not handed out by the guest allocator or was already freed")]
    UnknownAllocation(GuestAddress),

    #[error("string of {len} bytes does not fit a 32-bit guest allocation")]
    StringTooLong { len: usize },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} is not supported by the {1} engine")]
    Unsupported(&'static str, &'static str),

    #[error("the {0} engine is not compiled into this build")]
    Unavailable(&'static str),

    #[error("failed to configure engine: {0}")]
    Config(String),
}

/// Any failure surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Instantiation(#[from] InstantiationError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("export `{name}` returned {found}, expected a single i32 address")]
    UnexpectedResult { name: String, found: String },
}
