//! Value codec for script stack slots
//!
//! Converts between a single VM stack slot and [`ScriptValue`]. The codec
//! knows nothing about host objects: handles are read and written as raw
//! tokens, and the marshal layer maps them to and from the handle registry.

use skein_sdk::{FunctionRef, HandleToken, ScriptValue, ScriptVm, ValueType};

/// Raw metatable key under which a proxy table stores its handle token
pub const HANDLE_KEY: &str = "__handle";

/// Read the value at `idx` without changing the stack.
///
/// Numbers always decode to `Float`; use [`read_integer`] for an explicit
/// integer read. Functions decode to the absolute slot they occupy, valid
/// only for the current frame.
pub fn read(vm: &mut dyn ScriptVm, idx: i32) -> ScriptValue {
    let idx = vm.abs_index(idx);
    match vm.type_of(idx) {
        ValueType::Nil => ScriptValue::Nil,
        ValueType::Boolean => ScriptValue::Bool(vm.to_boolean(idx)),
        ValueType::Number => vm.to_number(idx).map_or(ScriptValue::Nil, ScriptValue::Float),
        ValueType::String => vm
            .to_bytes(idx)
            .map_or(ScriptValue::Nil, ScriptValue::String),
        ValueType::Function => ScriptValue::Function(FunctionRef::Slot(idx)),
        ValueType::LightUserdata | ValueType::Table => {
            handle_of(vm, idx).map_or(ScriptValue::Nil, ScriptValue::Handle)
        }
    }
}

/// Read the value at `idx` as an integer, if it holds an integral number
pub fn read_integer(vm: &dyn ScriptVm, idx: i32) -> Option<i64> {
    vm.to_integer(idx)
}

/// Push `value`. A disposed pinned function pushes nil.
pub fn write(vm: &mut dyn ScriptVm, value: &ScriptValue) {
    match value {
        ScriptValue::Nil => vm.push_nil(),
        ScriptValue::Bool(b) => vm.push_boolean(*b),
        ScriptValue::Integer(i) => vm.push_integer(*i),
        ScriptValue::Float(f) => vm.push_number(*f),
        ScriptValue::String(bytes) => vm.push_string(bytes),
        ScriptValue::Function(FunctionRef::Slot(idx)) => vm.push_value(*idx),
        ScriptValue::Function(FunctionRef::Pinned(reference)) => {
            vm.push_reference(*reference);
        }
        ScriptValue::Handle(token) => vm.push_light_userdata(token.id, token.tag),
    }
}

/// Handle token carried by the value at `idx`.
///
/// Either a bare light userdata, or a proxy table whose metatable stores
/// the token under [`HANDLE_KEY`].
pub fn handle_of(vm: &mut dyn ScriptVm, idx: i32) -> Option<HandleToken> {
    let idx = vm.abs_index(idx);
    match vm.type_of(idx) {
        ValueType::LightUserdata => vm
            .to_light_userdata(idx)
            .map(|(id, tag)| HandleToken::new(id, tag)),
        ValueType::Table => {
            if !vm.get_metatable(idx) {
                return None;
            }
            vm.raw_get_field(-1, HANDLE_KEY);
            let token = vm
                .to_light_userdata(-1)
                .map(|(id, tag)| HandleToken::new(id, tag));
            vm.pop(2);
            token
        }
        _ => None,
    }
}

/// Render the value at `idx` the way `print` shows it.
///
/// A failing `__tostring` metamethod is logged and the table renders as
/// `table`.
pub fn display(vm: &mut dyn ScriptVm, idx: i32) -> String {
    skein_sdk::display(vm, idx).unwrap_or_else(|e| {
        log::warn!("__tostring failed: {}", e);
        "table".to_string()
    })
}
