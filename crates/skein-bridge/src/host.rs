//! Host-side value model
//!
//! [`HostValue`] is what host code sees on the other side of the bridge:
//! primitives, shared host objects, static surfaces and callables in both
//! directions. Conversions to and from plain Rust types go through the
//! [`FromHost`] and [`IntoHost`] traits.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::{BridgeError, BridgeResult};
use crate::function::{HostFunction, ScriptFunction};
use crate::overload::coerce;
use crate::surface::StaticSurface;
use crate::types::TypeDescriptor;

// ============================================================================
// HostType
// ============================================================================

/// Declared type of a parameter, field or property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    /// Boolean
    Bool,
    /// 64-bit integer
    Int,
    /// Double-precision float
    Float,
    /// UTF-8 text
    String,
    /// Host object of the named forwarded type
    Object(&'static str),
    /// Script function or host callable
    Function,
    /// Anything, passed through unchanged
    Any,
}

impl HostType {
    /// Primitive types take part in value conversion; others pass through
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            HostType::Bool | HostType::Int | HostType::Float | HostType::String
        )
    }

    /// Check whether `value` already has this type at runtime
    pub fn matches(&self, value: &HostValue) -> bool {
        match (self, value) {
            (HostType::Any, _) => true,
            (HostType::Bool, HostValue::Bool(_)) => true,
            (HostType::Int, HostValue::Int(_)) => true,
            (HostType::Float, HostValue::Float(_)) => true,
            (HostType::String, HostValue::Str(_)) => true,
            (HostType::Object(name), HostValue::Object(obj)) => obj.type_name() == *name,
            (HostType::Function, HostValue::Function(_) | HostValue::Callable(_)) => true,
            _ => false,
        }
    }

    /// Type name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            HostType::Bool => "bool",
            HostType::Int => "int",
            HostType::Float => "float",
            HostType::String => "string",
            HostType::Object(name) => *name,
            HostType::Function => "function",
            HostType::Any => "any",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// HostObject
// ============================================================================

/// Shared, type-erased host object.
///
/// Clones share the same underlying value: a script that mutates an object
/// it received mutates the host's copy too.
#[derive(Clone)]
pub struct HostObject {
    cell: Rc<RefCell<dyn Any>>,
    descriptor: Rc<TypeDescriptor>,
}

impl HostObject {
    pub(crate) fn new<T: Any>(value: T, descriptor: Rc<TypeDescriptor>) -> Self {
        let cell: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(value));
        Self { cell, descriptor }
    }

    /// Name of the forwarded type
    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Member directory of the object's type
    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    /// Check the concrete type
    pub fn is<T: Any>(&self) -> bool {
        self.cell
            .try_borrow()
            .map(|v| v.is::<T>())
            .unwrap_or(false)
    }

    /// Check whether two objects share the same underlying value
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Address of the shared value, stable for the object's lifetime
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as *const () as usize
    }

    /// Borrow the object as `T`
    pub fn borrow<T: Any>(&self) -> BridgeResult<Ref<'_, T>> {
        Ref::filter_map(self.borrow_any()?, |v| v.downcast_ref::<T>())
            .map_err(|_| BridgeError::mismatch(std::any::type_name::<T>(), self.type_name()))
    }

    /// Mutably borrow the object as `T`
    pub fn borrow_mut<T: Any>(&self) -> BridgeResult<RefMut<'_, T>> {
        RefMut::filter_map(self.borrow_any_mut()?, |v| v.downcast_mut::<T>())
            .map_err(|_| BridgeError::mismatch(std::any::type_name::<T>(), self.type_name()))
    }

    pub(crate) fn borrow_any(&self) -> BridgeResult<Ref<'_, dyn Any>> {
        self.cell.try_borrow().map_err(|_| self.conflict())
    }

    pub(crate) fn borrow_any_mut(&self) -> BridgeResult<RefMut<'_, dyn Any>> {
        self.cell.try_borrow_mut().map_err(|_| self.conflict())
    }

    fn conflict(&self) -> BridgeError {
        BridgeError::BorrowConflict {
            type_name: self.type_name().to_string(),
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HostValue
// ============================================================================

/// A value on the host side of the bridge
#[derive(Clone, Default)]
pub enum HostValue {
    /// Absent value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text
    Str(String),
    /// Shared host object
    Object(HostObject),
    /// Static surface of a forwarded type
    Surface(Rc<StaticSurface>),
    /// Script function held by the host
    Function(Rc<ScriptFunction>),
    /// Host callable exposed to scripts
    Callable(HostFunction),
}

impl HostValue {
    /// Create a text value
    pub fn str(s: impl Into<String>) -> Self {
        HostValue::Str(s.into())
    }

    /// Check if this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of either number variant
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(i) => Some(*i as f64),
            HostValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Object view
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get type name for diagnostics
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "string",
            HostValue::Object(obj) => obj.type_name(),
            HostValue::Surface(surface) => surface.type_name(),
            HostValue::Function(_) => "function",
            HostValue::Callable(_) => "callable",
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a.ptr_eq(b),
            (HostValue::Surface(a), HostValue::Surface(b)) => Rc::ptr_eq(a, b),
            (HostValue::Function(a), HostValue::Function(b)) => Rc::ptr_eq(a, b),
            (HostValue::Callable(a), HostValue::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => write!(f, "Nil"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Int(i) => write!(f, "Int({})", i),
            HostValue::Float(x) => write!(f, "Float({})", x),
            HostValue::Str(s) => write!(f, "Str({:?})", s),
            HostValue::Object(obj) => write!(f, "Object({})", obj.type_name()),
            HostValue::Surface(s) => write!(f, "Surface({})", s.type_name()),
            HostValue::Function(_) => write!(f, "Function"),
            HostValue::Callable(c) => write!(f, "Callable({})", c.name()),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Conversion from a host value into a Rust type
pub trait FromHost: Sized {
    /// Declared type used when a script assigns or passes this type
    fn host_type() -> HostType;

    /// Convert, applying the bridge's primitive conversions
    fn from_host(value: &HostValue) -> BridgeResult<Self>;
}

/// Conversion from a Rust type into a host value
pub trait IntoHost {
    /// Convert into a host value
    fn into_host(self) -> HostValue;
}

fn convert(value: &HostValue, ty: HostType) -> BridgeResult<HostValue> {
    coerce(value, &ty).ok_or_else(|| BridgeError::mismatch(ty.name(), value.type_name()))
}

macro_rules! int_conversions {
    ($($t:ty),*) => {$(
        impl FromHost for $t {
            fn host_type() -> HostType {
                HostType::Int
            }

            fn from_host(value: &HostValue) -> BridgeResult<Self> {
                match convert(value, HostType::Int)? {
                    HostValue::Int(i) => <$t>::try_from(i)
                        .map_err(|_| BridgeError::mismatch(stringify!($t), i.to_string())),
                    other => Err(BridgeError::mismatch(stringify!($t), other.type_name())),
                }
            }
        }

        impl IntoHost for $t {
            fn into_host(self) -> HostValue {
                HostValue::Int(self as i64)
            }
        }
    )*};
}

int_conversions!(i8, i16, i32, i64, u8, u16, u32, usize);

impl FromHost for f64 {
    fn host_type() -> HostType {
        HostType::Float
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match convert(value, HostType::Float)? {
            HostValue::Float(f) => Ok(f),
            other => Err(BridgeError::mismatch("float", other.type_name())),
        }
    }
}

impl FromHost for f32 {
    fn host_type() -> HostType {
        HostType::Float
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        f64::from_host(value).map(|f| f as f32)
    }
}

impl IntoHost for f64 {
    fn into_host(self) -> HostValue {
        HostValue::Float(self)
    }
}

impl IntoHost for f32 {
    fn into_host(self) -> HostValue {
        HostValue::Float(self as f64)
    }
}

impl FromHost for bool {
    fn host_type() -> HostType {
        HostType::Bool
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match convert(value, HostType::Bool)? {
            HostValue::Bool(b) => Ok(b),
            other => Err(BridgeError::mismatch("bool", other.type_name())),
        }
    }
}

impl IntoHost for bool {
    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }
}

impl FromHost for String {
    fn host_type() -> HostType {
        HostType::String
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match convert(value, HostType::String)? {
            HostValue::Str(s) => Ok(s),
            other => Err(BridgeError::mismatch("string", other.type_name())),
        }
    }
}

impl IntoHost for String {
    fn into_host(self) -> HostValue {
        HostValue::Str(self)
    }
}

impl IntoHost for &str {
    fn into_host(self) -> HostValue {
        HostValue::Str(self.to_string())
    }
}

impl IntoHost for () {
    fn into_host(self) -> HostValue {
        HostValue::Nil
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn host_type() -> HostType {
        T::host_type()
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> HostValue {
        self.map_or(HostValue::Nil, IntoHost::into_host)
    }
}

impl FromHost for HostValue {
    fn host_type() -> HostType {
        HostType::Any
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        Ok(value.clone())
    }
}

impl IntoHost for HostValue {
    fn into_host(self) -> HostValue {
        self
    }
}

impl FromHost for HostObject {
    fn host_type() -> HostType {
        HostType::Object("object")
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Object(obj) => Ok(obj.clone()),
            other => Err(BridgeError::mismatch("object", other.type_name())),
        }
    }
}

impl IntoHost for HostObject {
    fn into_host(self) -> HostValue {
        HostValue::Object(self)
    }
}

impl FromHost for Rc<ScriptFunction> {
    fn host_type() -> HostType {
        HostType::Function
    }

    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Function(f) => Ok(f.clone()),
            other => Err(BridgeError::mismatch("function", other.type_name())),
        }
    }
}

impl IntoHost for Rc<ScriptFunction> {
    fn into_host(self) -> HostValue {
        HostValue::Function(self)
    }
}

impl IntoHost for HostFunction {
    fn into_host(self) -> HostValue {
        HostValue::Callable(self)
    }
}

macro_rules! from_into_host {
    ($($t:ty),*) => {$(
        impl From<$t> for HostValue {
            fn from(value: $t) -> Self {
                value.into_host()
            }
        }
    )*};
}

from_into_host!(i8, i16, i32, i64, u8, u16, u32, usize, f32, f64, bool, String, &str, ());

/// Read argument `i` of a callable as `T`; missing arguments read as nil
pub fn arg<T: FromHost>(args: &[HostValue], i: usize) -> BridgeResult<T> {
    T::from_host(args.get(i).unwrap_or(&HostValue::Nil))
}

// ============================================================================
// Dictionaries
// ============================================================================

/// Host mapping from string keys to values.
///
/// A dictionary-like object answers member reads and writes from its
/// entries before any declared member is consulted.
pub trait HostDictionary: 'static {
    /// Value stored under `key`
    fn get_entry(&self, key: &str) -> Option<HostValue>;

    /// Store `value` under `key`, replacing any previous entry
    fn set_entry(&mut self, key: &str, value: HostValue) -> BridgeResult<()>;

    /// Check if `key` is present
    fn contains_entry(&self, key: &str) -> bool {
        self.get_entry(key).is_some()
    }
}

impl<V> HostDictionary for HashMap<String, V>
where
    V: FromHost + IntoHost + Clone + 'static,
{
    fn get_entry(&self, key: &str) -> Option<HostValue> {
        self.get(key).cloned().map(IntoHost::into_host)
    }

    fn set_entry(&mut self, key: &str, value: HostValue) -> BridgeResult<()> {
        self.insert(key.to_string(), V::from_host(&value)?);
        Ok(())
    }

    fn contains_entry(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl<V> HostDictionary for BTreeMap<String, V>
where
    V: FromHost + IntoHost + Clone + 'static,
{
    fn get_entry(&self, key: &str) -> Option<HostValue> {
        self.get(key).cloned().map(IntoHost::into_host)
    }

    fn set_entry(&mut self, key: &str, value: HostValue) -> BridgeResult<()> {
        self.insert(key.to_string(), V::from_host(&value)?);
        Ok(())
    }

    fn contains_entry(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}
