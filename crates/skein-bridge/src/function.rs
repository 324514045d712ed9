//! Function bridge
//!
//! Host callables become native VM closures ([`HostFunction`]); script
//! functions handed to the host are pinned in the VM registry and wrapped
//! as [`ScriptFunction`] until explicitly disposed.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use skein_sdk::{NativeFunction, RefId, ScriptError, ScriptVm};

use crate::context::{BridgeState, CallContext};
use crate::error::{catch_host_panic, BridgeError, BridgeResult};
use crate::host::{FromHost, HostValue, IntoHost};
use crate::marshal;

type HostBody = Rc<dyn Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<HostValue>>;

fn native_fn<F>(f: F) -> NativeFunction
where
    F: Fn(&mut dyn ScriptVm) -> Result<usize, ScriptError> + 'static,
{
    Rc::new(f)
}

fn host_body<F>(f: F) -> HostBody
where
    F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<HostValue> + 'static,
{
    Rc::new(f)
}

/// Wrap a bridge hook as a native VM closure.
///
/// The hook's errors and panics become script errors here, so nothing
/// unwinds through the VM.
pub(crate) fn native<F>(state: &Rc<BridgeState>, hook: F) -> NativeFunction
where
    F: Fn(&mut CallContext<'_>) -> BridgeResult<usize> + 'static,
{
    let state = Rc::clone(state);
    native_fn(move |vm| {
        let mut cx = CallContext::new(vm, Rc::clone(&state));
        catch_host_panic(|| hook(&mut cx)).map_err(|e| {
            log::debug!("Bridge call failed: {}", e);
            ScriptError::from(e)
        })
    })
}

// ============================================================================
// Host -> script
// ============================================================================

/// Host callable exposed to scripts.
///
/// Arguments arrive positionally without overload resolution. The callable
/// returns one value to the script, or none if it was built with
/// [`HostFunction::action`].
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    body: HostBody,
    returns_value: bool,
}

impl HostFunction {
    /// Callable returning a value
    pub fn new<R, F>(name: &str, f: F) -> Self
    where
        R: IntoHost,
        F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<R> + 'static,
    {
        Self {
            name: name.into(),
            body: host_body(move |cx, args| f(cx, args).map(IntoHost::into_host)),
            returns_value: true,
        }
    }

    /// Callable returning nothing
    pub fn action<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<()> + 'static,
    {
        Self {
            name: name.into(),
            body: host_body(move |cx, args| f(cx, args).map(|()| HostValue::Nil)),
            returns_value: false,
        }
    }

    /// Name shown in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False for callables built with [`HostFunction::action`]
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// Invoke directly from host code
    pub fn invoke(
        &self,
        cx: &mut CallContext<'_>,
        args: &[HostValue],
    ) -> BridgeResult<Option<HostValue>> {
        let result = (self.body)(cx, args)?;
        Ok(self.returns_value.then_some(result))
    }

    /// Check whether two handles share the same callable
    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("returns_value", &self.returns_value)
            .finish_non_exhaustive()
    }
}

/// Push `function` as a native closure
pub(crate) fn push_host_function(
    cx: &mut CallContext<'_>,
    function: &HostFunction,
) -> BridgeResult<()> {
    let callable = function.clone();
    let closure = native(cx.state(), move |cx| {
        let args = marshal::read_args(cx, 1)?;
        match callable.invoke(cx, &args)? {
            Some(value) => {
                marshal::push(cx, &value)?;
                Ok(1)
            }
            None => Ok(0),
        }
    });
    cx.vm().push_function(function.name(), closure);
    Ok(())
}

// ============================================================================
// Script -> host
// ============================================================================

/// Script function held by the host.
///
/// The function stays pinned in the VM until [`ScriptFunction::dispose`];
/// a function that is never disposed stays pinned for the session's
/// lifetime.
pub struct ScriptFunction {
    reference: Cell<Option<RefId>>,
}

impl ScriptFunction {
    /// Pin the function at `idx`
    pub(crate) fn pin(cx: &mut CallContext<'_>, idx: i32) -> Rc<Self> {
        let reference = cx.vm().reference(idx);
        Self::adopt(cx, reference)
    }

    pub(crate) fn adopt(cx: &mut CallContext<'_>, reference: RefId) -> Rc<Self> {
        let live = &cx.state().live_functions;
        live.set(live.get() + 1);
        Rc::new(Self {
            reference: Cell::new(Some(reference)),
        })
    }

    /// Check whether [`ScriptFunction::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.reference.get().is_none()
    }

    fn reference(&self) -> BridgeResult<RefId> {
        self.reference.get().ok_or(BridgeError::DisposedFunction)
    }

    /// Call the function and return its first result (nil if none)
    pub fn call(&self, cx: &mut CallContext<'_>, args: &[HostValue]) -> BridgeResult<HostValue> {
        let reference = self.reference()?;
        let base = cx.vm().top();
        cx.vm().push_reference(reference);
        for value in args {
            if let Err(e) = marshal::push(cx, value) {
                cx.vm().set_top(base);
                return Err(e);
            }
        }

        cx.vm().pcall(args.len() as i32, 1)?;
        let result = marshal::read(cx, -1);
        cx.vm().set_top(base);
        result
    }

    /// Call the function and convert its first result
    pub fn call_as<R: FromHost>(
        &self,
        cx: &mut CallContext<'_>,
        args: &[HostValue],
    ) -> BridgeResult<R> {
        R::from_host(&self.call(cx, args)?)
    }

    /// Unpin the function. Later calls fail with `DisposedFunction`, and so
    /// does a second dispose.
    pub fn dispose(&self, cx: &mut CallContext<'_>) -> BridgeResult<()> {
        let reference = self.reference.take().ok_or(BridgeError::DisposedFunction)?;
        cx.vm().release_reference(reference);
        let live = &cx.state().live_functions;
        live.set(live.get().saturating_sub(1));
        Ok(())
    }

    pub(crate) fn push(&self, cx: &mut CallContext<'_>) -> BridgeResult<()> {
        let reference = self.reference()?;
        cx.vm().push_reference(reference);
        Ok(())
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("reference", &self.reference.get())
            .finish()
    }
}
