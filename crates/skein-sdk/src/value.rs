//! ScriptValue - values as they sit in a script VM stack slot
//!
//! Primitive values are copied out of the VM. Functions are referred to
//! either by the stack slot they occupy or by a pinned registry reference,
//! and host objects appear only as opaque handle tokens.

use crate::vm::RefId;

/// Type tag of a stack slot, as reported by [`ScriptVm::type_of`].
///
/// [`ScriptVm::type_of`]: crate::ScriptVm::type_of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Slot is empty or holds nil
    Nil,
    /// true / false
    Boolean,
    /// Tagged integer-sized token
    LightUserdata,
    /// Double-precision number
    Number,
    /// Length-prefixed byte string
    String,
    /// Key/value table
    Table,
    /// Native or script function
    Function,
}

impl ValueType {
    /// Script-facing type name
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::LightUserdata => "userdata",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
        }
    }
}

/// Opaque token standing in for a host object.
///
/// The `id` is meaningful only to the host bridge that issued it; the `tag`
/// discriminates handle classes so tokens of different forwarded types can
/// never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleToken {
    /// Bridge-assigned identifier
    pub id: u64,
    /// Handle class tag
    pub tag: u32,
}

impl HandleToken {
    /// Create a token
    pub const fn new(id: u64, tag: u32) -> Self {
        Self { id, tag }
    }
}

/// Format a number the way scripts print it: integral values have no
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// How a script function is held on the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    /// Function currently at this absolute stack slot (not pinned)
    Slot(i32),
    /// Function pinned in the VM registry
    Pinned(RefId),
}

/// A value read from or written to a script stack slot.
///
/// Exactly one variant is active. Numbers read off the stack are always
/// `Float`; `Integer` is only produced by an explicit integer read.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// nil
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer (explicit integer accessor only)
    Integer(i64),
    /// Double-precision number
    Float(f64),
    /// Byte string, may contain embedded nulls
    String(Vec<u8>),
    /// Script function
    Function(FunctionRef),
    /// Opaque host handle
    Handle(HandleToken),
}

impl ScriptValue {
    /// Create a string value from text
    pub fn string(s: impl AsRef<str>) -> Self {
        ScriptValue::String(s.as_ref().as_bytes().to_vec())
    }

    /// Check if this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Float(f) => Some(*f),
            ScriptValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String view of the value, if it is valid UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Get type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Integer(_) | ScriptValue::Float(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Function(_) => "function",
            ScriptValue::Handle(_) => "userdata",
        }
    }
}
