//! Engine-independent descriptions of values, signatures, imports and exports.

use std::fmt;

use wasmhost_config::{ConstValue, ValueTypeName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValType {
    /// Whether values of this type can cross the host boundary as a [`Value`].
    pub fn is_scalar(self) -> bool {
        matches!(self, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

impl From<ValueTypeName> for ValType {
    fn from(name: ValueTypeName) -> Self {
        match name {
            ValueTypeName::I32 => ValType::I32,
            ValueTypeName::I64 => ValType::I64,
            ValueTypeName::F32 => ValType::F32,
            ValueTypeName::F64 => ValType::F64,
        }
    }
}

/// A scalar value passed to or returned from guest code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
        }
    }

    /// Zero of the given type, or `None` for non-scalar types.
    pub fn zero(ty: ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(Value::I32(0)),
            ValType::I64 => Some(Value::I64(0)),
            ValType::F32 => Some(Value::F32(0.0)),
            ValType::F64 => Some(Value::F64(0.0)),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Parses `text` as a value of type `ty`.
    pub fn parse(ty: ValType, text: &str) -> Result<Self, String> {
        let err = |e: &dyn fmt::Display| format!("invalid {ty} `{text}`: {e}");
        match ty {
            ValType::I32 => text.parse().map(Value::I32).map_err(|e| err(&e)),
            ValType::I64 => text.parse().map(Value::I64).map_err(|e| err(&e)),
            ValType::F32 => text.parse().map(Value::F32).map_err(|e| err(&e)),
            ValType::F64 => text.parse().map(Value::F64).map_err(|e| err(&e)),
            other => Err(format!("{other} values cannot be passed from the host")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<ConstValue> for Value {
    fn from(value: ConstValue) -> Self {
        match value {
            ConstValue::I32(v) => Value::I32(v),
            ConstValue::I64(v) => Value::I64(v),
            ConstValue::F32(v) => Value::F32(v),
            ConstValue::F64(v) => Value::F64(v),
        }
    }
}

/// Parameter and result types of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncSignature {
    params: Vec<ValType>,
    results: Vec<ValType>,
}

impl FuncSignature {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }

    /// True when every parameter and result is a scalar.
    pub fn is_scalar(&self) -> bool {
        self.params.iter().chain(&self.results).all(|ty| ty.is_scalar())
    }

    /// True when `args` match the parameter list exactly.
    pub fn accepts(&self, args: &[Value]) -> bool {
        args.len() == self.params.len() && args.iter().zip(&self.params).all(|(a, p)| a.ty() == *p)
    }

    /// True when `values` match the result list exactly.
    pub fn produces(&self, values: &[Value]) -> bool {
        values.len() == self.results.len()
            && values.iter().zip(&self.results).all(|(v, r)| v.ty() == *r)
    }
}

fn write_types(f: &mut fmt::Formatter<'_>, types: &[ValType]) -> fmt::Result {
    f.write_str("(")?;
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    f.write_str(")")
}

impl fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_types(f, &self.params)?;
        f.write_str(" -> ")?;
        write_types(f, &self.results)
    }
}

/// Renders a list of argument types the same way signatures are rendered.
pub(crate) fn describe_args(args: &[Value]) -> String {
    let types: Vec<String> = args.iter().map(|arg| arg.ty().to_string()).collect();
    format!("({})", types.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalSignature {
    pub content: ValType,
    pub mutable: bool,
}

impl fmt::Display for GlobalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mutable {
            write!(f, "mut {}", self.content)
        } else {
            write!(f, "{}", self.content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableSignature {
    pub element: ValType,
    pub minimum: u64,
    pub maximum: Option<u64>,
}

/// Memory limits, in 64 KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemorySignature {
    pub minimum: u64,
    pub maximum: Option<u64>,
    pub memory64: bool,
    pub shared: bool,
}

fn write_limits(f: &mut fmt::Formatter<'_>, minimum: u64, maximum: Option<u64>) -> fmt::Result {
    match maximum {
        Some(max) => write!(f, "{minimum}..{max}"),
        None => write!(f, "{minimum}.."),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Func,
    Global,
    Table,
    Memory,
    Tag,
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternKind::Func => "func",
            ExternKind::Global => "global",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// Type of an import or export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternType {
    Func(FuncSignature),
    Global(GlobalSignature),
    Table(TableSignature),
    Memory(MemorySignature),
    /// Exception tags. Only described, never bound.
    Tag,
}

impl ExternType {
    pub fn kind(&self) -> ExternKind {
        match self {
            ExternType::Func(_) => ExternKind::Func,
            ExternType::Global(_) => ExternKind::Global,
            ExternType::Table(_) => ExternKind::Table,
            ExternType::Memory(_) => ExternKind::Memory,
            ExternType::Tag => ExternKind::Tag,
        }
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Func(sig) => write!(f, "func {sig}"),
            ExternType::Global(sig) => write!(f, "global {sig}"),
            ExternType::Table(sig) => {
                write!(f, "table {} ", sig.element)?;
                write_limits(f, sig.minimum, sig.maximum)
            }
            ExternType::Memory(sig) => {
                f.write_str("memory ")?;
                write_limits(f, sig.minimum, sig.maximum)?;
                if sig.memory64 {
                    f.write_str(" i64")?;
                }
                if sig.shared {
                    f.write_str(" shared")?;
                }
                Ok(())
            }
            ExternType::Tag => f.write_str("tag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportDescriptor {
    pub module: String,
    pub name: String,
    pub ty: ExternType,
}

impl ImportDescriptor {
    pub fn kind(&self) -> ExternKind {
        self.ty.kind()
    }
}

impl fmt::Display for ImportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}: {}", self.module, self.name, self.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportDescriptor {
    pub name: String,
    pub ty: ExternType,
}

impl ExportDescriptor {
    pub fn kind(&self) -> ExternKind {
        self.ty.kind()
    }
}

impl fmt::Display for ExportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

/// Offset into an instance's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestAddress(pub u32);

impl GuestAddress {
    pub fn offset(self) -> usize {
        self.0 as usize
    }

    /// Interprets an `i32` returned by the guest as an unsigned address.
    pub fn from_i32(raw: i32) -> Self {
        Self(raw as u32)
    }

    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
