//! Runtime values of the reference VM

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::{format_number, NativeFunction, ValueType};

/// Shared, mutable table
pub type TableRef = Rc<RefCell<Table>>;

/// A VM value
#[derive(Clone, Default)]
pub enum Value {
    /// nil
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Number (always double precision)
    Number(f64),
    /// Immutable byte string
    String(Rc<[u8]>),
    /// Tagged token
    LightUserdata {
        /// Token payload
        payload: u64,
        /// Token tag
        tag: u32,
    },
    /// Table
    Table(TableRef),
    /// Function
    Function(Rc<Function>),
}

impl Value {
    /// Create a string value
    pub fn string(bytes: &[u8]) -> Self {
        Value::String(Rc::from(bytes))
    }

    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::LightUserdata { .. } => ValueType::LightUserdata,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
        }
    }

    /// Check if value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// nil and false are falsy, everything else is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Value::LightUserdata { payload, tag } => {
                write!(f, "userdata({:#x}, tag={})", payload, tag)
            }
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(func) => write!(f, "function: {}", func.name),
        }
    }
}

/// A callable value
pub struct Function {
    /// Debug name
    pub name: String,
    /// Entry point
    pub body: NativeFunction,
}

impl Function {
    /// Create a function
    pub fn new(name: impl Into<String>, body: NativeFunction) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// String-keyed table with an optional metatable
#[derive(Default)]
pub struct Table {
    fields: FxHashMap<Vec<u8>, Value>,
    /// Metatable consulted for `__index` / `__newindex`
    pub metatable: Option<TableRef>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh table for sharing
    pub fn new_ref() -> TableRef {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Raw lookup; nil when absent
    pub fn get(&self, key: &[u8]) -> Value {
        self.fields.get(key).cloned().unwrap_or_default()
    }

    /// Check if a key has a non-nil value
    pub fn contains(&self, key: &[u8]) -> bool {
        self.fields.contains_key(key)
    }

    /// Raw assignment; assigning nil removes the key
    pub fn set(&mut self, key: &[u8], value: Value) {
        if value.is_nil() {
            self.fields.remove(key);
        } else {
            self.fields.insert(key.to_vec(), value);
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the table has no keys
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a metamethod by name
    pub fn metamethod(&self, event: &str) -> Value {
        match &self.metatable {
            Some(meta) => meta.borrow().get(event.as_bytes()),
            None => Value::Nil,
        }
    }
}
