//! Marshalling between VM stack slots and host values
//!
//! Builds on the codec: primitives map one to one, handles are resolved
//! through the registry, host objects and surfaces are pushed as proxy
//! tables, and functions are pinned or wrapped as native closures.

use skein_sdk::{FunctionRef, ScriptValue};

use crate::codec;
use crate::context::CallContext;
use crate::error::BridgeResult;
use crate::function::{push_host_function, ScriptFunction};
use crate::handles::HandleEntry;
use crate::host::HostValue;
use crate::member::push_proxy;

/// Push `value` onto the VM stack.
///
/// The first push of a host object issues a handle and pins a proxy table
/// for it; later pushes of the same object reuse both until the session is
/// torn down.
pub fn push(cx: &mut CallContext<'_>, value: &HostValue) -> BridgeResult<()> {
    match value {
        HostValue::Nil => codec::write(cx.vm(), &ScriptValue::Nil),
        HostValue::Bool(b) => codec::write(cx.vm(), &ScriptValue::Bool(*b)),
        HostValue::Int(i) => codec::write(cx.vm(), &ScriptValue::Integer(*i)),
        HostValue::Float(f) => codec::write(cx.vm(), &ScriptValue::Float(*f)),
        HostValue::Str(s) => cx.vm().push_string(s.as_bytes()),
        HostValue::Object(obj) => {
            let token = match cx.state().token_of(obj) {
                Some(token) => token,
                None => cx
                    .state()
                    .alloc(HandleEntry::Object(obj.clone()), obj.descriptor().tag())?,
            };
            push_proxy(cx, token, obj.type_name())?;
        }
        HostValue::Surface(surface) => {
            let live = surface
                .token()
                .filter(|token| cx.state().resolve(*token).is_ok());
            let token = match live {
                Some(token) => token,
                None => {
                    let token = cx
                        .state()
                        .alloc(HandleEntry::Surface(surface.clone()), surface.tag())?;
                    surface.set_token(token);
                    token
                }
            };
            push_proxy(cx, token, surface.type_name())?;
        }
        HostValue::Function(function) => function.push(cx)?,
        HostValue::Callable(callable) => push_host_function(cx, callable)?,
    }
    Ok(())
}

/// Read the value at `idx`.
///
/// Script functions are pinned so the host may keep them past the current
/// call; they stay pinned until disposed. Tables that are not bridge
/// proxies read as nil.
pub fn read(cx: &mut CallContext<'_>, idx: i32) -> BridgeResult<HostValue> {
    let idx = cx.vm().abs_index(idx);
    Ok(match codec::read(cx.vm(), idx) {
        ScriptValue::Nil => HostValue::Nil,
        ScriptValue::Bool(b) => HostValue::Bool(b),
        ScriptValue::Integer(i) => HostValue::Int(i),
        ScriptValue::Float(f) => HostValue::Float(f),
        ScriptValue::String(bytes) => HostValue::Str(String::from_utf8_lossy(&bytes).into_owned()),
        ScriptValue::Function(FunctionRef::Slot(slot)) => {
            HostValue::Function(ScriptFunction::pin(cx, slot))
        }
        ScriptValue::Function(FunctionRef::Pinned(reference)) => {
            HostValue::Function(ScriptFunction::adopt(cx, reference))
        }
        ScriptValue::Handle(token) => cx.resolve(token)?,
    })
}

/// Read every value from slot `first` to the top of the current frame
pub fn read_args(cx: &mut CallContext<'_>, first: i32) -> BridgeResult<Vec<HostValue>> {
    let top = cx.vm().top();
    (first..=top).map(|idx| read(cx, idx)).collect()
}
