//! Member access bridge
//!
//! Host objects and static surfaces reach scripts as proxy tables. The
//! proxy's metatable carries the handle token plus `__index`, `__newindex`
//! and `__tostring` hooks; the hooks resolve the token and route the access
//! through [`read`], [`write`] and [`invoke`].
//!
//! Lookup order for instance reads: dictionary entries (dictionary-like
//! types only), then fields, then properties, and otherwise a callable bound
//! to the object and the member name. Method existence is only checked when
//! that callable runs.

use std::rc::Rc;

use skein_sdk::{HandleToken, ValueType};

use crate::codec::{self, HANDLE_KEY};
use crate::context::CallContext;
use crate::error::{BridgeError, BridgeResult};
use crate::function::native;
use crate::handles::HandleEntry;
use crate::host::{HostObject, HostType, HostValue};
use crate::marshal;
use crate::overload::{coerce, select, Selection};
use crate::surface::{Access, StaticSurface, Thunk};

/// Object a member access is aimed at
#[derive(Debug, Clone)]
pub enum BridgeTarget {
    /// Host object instance
    Instance(HostObject),
    /// Static surface of a forwarded type
    Surface(Rc<StaticSurface>),
}

impl BridgeTarget {
    /// Resolve a handle token
    pub fn resolve(cx: &CallContext<'_>, token: HandleToken) -> BridgeResult<Self> {
        Ok(match cx.state().resolve(token)? {
            HandleEntry::Object(obj) => BridgeTarget::Instance(obj),
            HandleEntry::Surface(surface) => BridgeTarget::Surface(surface),
        })
    }

    /// Name of the target's type
    pub fn type_name(&self) -> &str {
        match self {
            BridgeTarget::Instance(obj) => obj.type_name(),
            BridgeTarget::Surface(surface) => surface.type_name(),
        }
    }
}

/// Result of a member read
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRead {
    /// Plain value
    Value(HostValue),
    /// Callable member; scripts receive a closure bound to the target
    Callable(String),
}

/// What a member write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Existing member or entry assigned
    Assigned,
    /// New dictionary entry created
    Inserted,
    /// No such member; nothing changed
    Ignored,
}

/// Read member `name` of `target`
pub fn read(
    cx: &mut CallContext<'_>,
    target: &BridgeTarget,
    name: &str,
) -> BridgeResult<MemberRead> {
    match target {
        BridgeTarget::Instance(obj) => read_instance(obj, name),
        BridgeTarget::Surface(surface) => match surface.member(name).cloned() {
            Some(Thunk::Field(thunk)) | Some(Thunk::Property(thunk)) => {
                Ok(MemberRead::Value(thunk(cx, Access::Read)?))
            }
            Some(Thunk::Method(_)) | Some(Thunk::Constructor(_)) => {
                Ok(MemberRead::Callable(name.to_string()))
            }
            None => Ok(MemberRead::Value(HostValue::Nil)),
        },
    }
}

fn read_instance(obj: &HostObject, name: &str) -> BridgeResult<MemberRead> {
    let descriptor = obj.descriptor();

    if let Some(dictionary) = &descriptor.dictionary {
        let guard = obj.borrow_any()?;
        let entry = (dictionary.get)(&*guard, name)?;
        return Ok(MemberRead::Value(entry.unwrap_or_default()));
    }

    let accessors = [descriptor.fields.get(name), descriptor.properties.get(name)];
    for accessor in accessors.into_iter().flatten() {
        if let Some(get) = &accessor.get {
            let guard = obj.borrow_any()?;
            return Ok(MemberRead::Value(get(&*guard)?));
        }
    }

    Ok(MemberRead::Callable(name.to_string()))
}

/// Assign `value` to member `name` of `target`.
///
/// Unknown members are ignored. Members without a setter, and callable
/// members of a static surface, fail with `ReadOnlyMemberWrite`.
pub fn write(
    cx: &mut CallContext<'_>,
    target: &BridgeTarget,
    name: &str,
    value: HostValue,
) -> BridgeResult<WriteOutcome> {
    match target {
        BridgeTarget::Instance(obj) => write_instance(obj, name, value),
        BridgeTarget::Surface(surface) => match surface.member(name).cloned() {
            Some(Thunk::Field(thunk)) | Some(Thunk::Property(thunk)) => {
                thunk(cx, Access::Write(value))?;
                Ok(WriteOutcome::Assigned)
            }
            Some(Thunk::Method(_)) | Some(Thunk::Constructor(_)) => {
                Err(BridgeError::ReadOnlyMemberWrite {
                    member: name.to_string(),
                })
            }
            None => {
                log::warn!("Ignoring write to unknown member {}.{}", surface.type_name(), name);
                Ok(WriteOutcome::Ignored)
            }
        },
    }
}

fn write_instance(obj: &HostObject, name: &str, value: HostValue) -> BridgeResult<WriteOutcome> {
    let descriptor = obj.descriptor();

    if let Some(dictionary) = &descriptor.dictionary {
        let mut guard = obj.borrow_any_mut()?;
        let existed = (dictionary.contains)(&*guard, name);
        (dictionary.set)(&mut *guard, name, value)?;
        return Ok(if existed {
            WriteOutcome::Assigned
        } else {
            WriteOutcome::Inserted
        });
    }

    let accessors = [descriptor.fields.get(name), descriptor.properties.get(name)];
    if let Some(accessor) = accessors.into_iter().flatten().next() {
        let set = accessor
            .set
            .as_ref()
            .ok_or_else(|| BridgeError::ReadOnlyMemberWrite {
                member: name.to_string(),
            })?;
        let value = coerce(&value, &accessor.ty)
            .ok_or_else(|| BridgeError::mismatch(accessor.ty.name(), value.type_name()))?;
        let mut guard = obj.borrow_any_mut()?;
        set(&mut *guard, value)?;
        return Ok(WriteOutcome::Assigned);
    }

    log::warn!("Ignoring write to unknown member {}.{}", obj.type_name(), name);
    Ok(WriteOutcome::Ignored)
}

/// Call member `name` of `target` with already-stripped arguments
pub fn invoke(
    cx: &mut CallContext<'_>,
    target: &BridgeTarget,
    name: &str,
    args: &[HostValue],
) -> BridgeResult<Option<HostValue>> {
    let no_match = || BridgeError::NoMatchingOverload {
        member: name.to_string(),
        arg_count: args.len(),
    };

    match target {
        BridgeTarget::Instance(obj) => {
            let overloads = obj.descriptor().method_overloads(name).ok_or_else(no_match)?;
            let candidates: Vec<&[HostType]> = overloads
                .iter()
                .map(|m| m.signature.params.as_slice())
                .collect();
            let Selection { index, args } = select(name, &candidates, args)?;
            let method = &overloads[index];
            let result = (method.invoke)(cx, obj, &args)?;
            Ok(method.signature.returns_value.then_some(result))
        }
        BridgeTarget::Surface(surface) => match surface.member(name).cloned() {
            Some(Thunk::Method(thunk)) | Some(Thunk::Constructor(thunk)) => thunk(cx, args),
            _ => Err(no_match()),
        },
    }
}

// ============================================================================
// VM hooks
// ============================================================================

/// Push a proxy table for `token`
pub(crate) fn push_proxy(
    cx: &mut CallContext<'_>,
    token: HandleToken,
    type_name: &str,
) -> BridgeResult<()> {
    let pinned = cx.state().proxies.borrow().get(&token).copied();
    if let Some(reference) = pinned {
        if cx.vm().push_reference(reference) {
            return Ok(());
        }
        cx.vm().pop(1);
    }

    let state = Rc::clone(cx.state());
    let index = native(&state, move |cx| index_hook(cx, token));
    let newindex = native(&state, move |cx| newindex_hook(cx, token));
    let label = type_name.to_string();
    let tostring = native(&state, move |cx| {
        cx.vm().push_string(label.as_bytes());
        Ok(1)
    });

    let vm = cx.vm();
    vm.new_table();
    vm.new_table();
    vm.push_light_userdata(token.id, token.tag);
    vm.raw_set_field(-2, HANDLE_KEY);
    vm.push_function("__index", index);
    vm.raw_set_field(-2, "__index");
    vm.push_function("__newindex", newindex);
    vm.raw_set_field(-2, "__newindex");
    vm.push_function("__tostring", tostring);
    vm.raw_set_field(-2, "__tostring");
    vm.set_metatable(-2)?;
    let reference = vm.reference(-1);
    state.proxies.borrow_mut().insert(token, reference);
    Ok(())
}

/// Member name at stack slot 2 of an index hook
fn member_name(cx: &mut CallContext<'_>) -> BridgeResult<String> {
    let vm = cx.vm();
    match vm.type_of(2) {
        ValueType::String => Ok(String::from_utf8_lossy(&vm.to_bytes(2).unwrap_or_default()).into_owned()),
        ValueType::Number => Ok(skein_sdk::format_number(vm.to_number(2).unwrap_or_default())),
        other => Err(BridgeError::NullMemberAccess(format!(
            "member name must be a string, got {}",
            other.name()
        ))),
    }
}

// (proxy, name) -> value
fn index_hook(cx: &mut CallContext<'_>, token: HandleToken) -> BridgeResult<usize> {
    let name = member_name(cx)?;
    let target = BridgeTarget::resolve(cx, token)?;
    match read(cx, &target, &name)? {
        MemberRead::Value(value) => marshal::push(cx, &value)?,
        MemberRead::Callable(name) => push_bound_callable(cx, token, name),
    }
    Ok(1)
}

// (proxy, name, value) -> ()
fn newindex_hook(cx: &mut CallContext<'_>, token: HandleToken) -> BridgeResult<usize> {
    let name = member_name(cx)?;
    let value = marshal::read(cx, 3)?;
    let target = BridgeTarget::resolve(cx, token)?;
    write(cx, &target, &name, value)?;
    Ok(0)
}

/// Push a closure that calls member `name` on the object behind `receiver`.
///
/// Method-call syntax passes the proxy itself as the first argument; it is
/// dropped when it carries `receiver`.
fn push_bound_callable(cx: &mut CallContext<'_>, receiver: HandleToken, name: String) {
    let label = name.clone();
    let closure = native(cx.state(), move |cx| {
        let first = if codec::handle_of(cx.vm(), 1) == Some(receiver) {
            2
        } else {
            1
        };
        let args = marshal::read_args(cx, first)?;
        let target = BridgeTarget::resolve(cx, receiver)?;
        match invoke(cx, &target, &name, &args)? {
            Some(value) => {
                marshal::push(cx, &value)?;
                Ok(1)
            }
            None => Ok(0),
        }
    });
    cx.vm().push_function(&label, closure);
}
