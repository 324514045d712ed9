//! Shared bridge state and the per-call context handed to host code

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::{HandleToken, RefId, ScriptVm};

use crate::error::{BridgeError, BridgeResult};
use crate::handles::{HandleEntry, HandleRegistry};
use crate::host::{HostObject, HostValue};
use crate::marshal;
use crate::types::TypeRegistry;

/// State shared by a session and every hook it installs in the VM.
///
/// Borrows of these cells are never held across a call into host code or
/// into the VM, so nested script/host calls can use them freely.
#[derive(Debug)]
pub(crate) struct BridgeState {
    pub(crate) handles: RefCell<HandleRegistry>,
    pub(crate) types: RefCell<TypeRegistry>,
    pub(crate) live_functions: Cell<usize>,
    /// Proxy table pinned for each live handle
    pub(crate) proxies: RefCell<FxHashMap<HandleToken, RefId>>,
}

impl BridgeState {
    pub(crate) fn new(max_handles: Option<usize>) -> Self {
        let handles = match max_handles {
            Some(limit) => HandleRegistry::with_limit(limit),
            None => HandleRegistry::new(),
        };
        Self {
            handles: RefCell::new(handles),
            types: RefCell::new(TypeRegistry::new()),
            live_functions: Cell::new(0),
            proxies: RefCell::new(FxHashMap::default()),
        }
    }

    pub(crate) fn resolve(&self, token: HandleToken) -> BridgeResult<HandleEntry> {
        self.handles.borrow().resolve(token)
    }

    pub(crate) fn alloc(&self, entry: HandleEntry, tag: u32) -> BridgeResult<HandleToken> {
        self.handles.borrow_mut().alloc(entry, tag)
    }

    /// Live token already issued for `obj`
    pub(crate) fn token_of(&self, obj: &HostObject) -> Option<HandleToken> {
        self.handles.borrow().token_of(obj)
    }

    /// Release `token` and unpin its proxy table
    pub(crate) fn release(&self, vm: &mut dyn ScriptVm, token: HandleToken) {
        // Already gone if released elsewhere
        let _ = self.handles.borrow_mut().release(token);
        let proxy = self.proxies.borrow_mut().remove(&token);
        if let Some(reference) = proxy {
            vm.release_reference(reference);
        }
    }
}

/// Access to the VM and the bridge for the duration of one host call.
///
/// Host callables, methods and constructors receive a context so they can
/// wrap new host objects, call script functions they were handed, or push
/// values of their own.
pub struct CallContext<'a> {
    vm: &'a mut dyn ScriptVm,
    state: Rc<BridgeState>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(vm: &'a mut dyn ScriptVm, state: Rc<BridgeState>) -> Self {
        Self { vm, state }
    }

    /// The underlying VM
    pub fn vm(&mut self) -> &mut dyn ScriptVm {
        &mut *self.vm
    }

    pub(crate) fn state(&self) -> &Rc<BridgeState> {
        &self.state
    }

    /// Wrap a host value of a forwarded type as a shared object.
    pub fn try_wrap<T: Any>(&self, value: T) -> BridgeResult<HostObject> {
        let descriptor = self
            .state
            .types
            .borrow()
            .get(TypeId::of::<T>())
            .ok_or_else(|| BridgeError::UnforwardedType(std::any::type_name::<T>().to_string()))?;
        Ok(HostObject::new(value, descriptor))
    }

    /// Like [`CallContext::try_wrap`], but values of types that were never
    /// forwarded become nil.
    pub fn wrap<T: Any>(&self, value: T) -> HostValue {
        match self.try_wrap(value) {
            Ok(obj) => HostValue::Object(obj),
            Err(e) => {
                log::warn!("{}; passing nil to the script", e);
                HostValue::Nil
            }
        }
    }

    /// Push a host value onto the VM stack
    pub fn push(&mut self, value: &HostValue) -> BridgeResult<()> {
        marshal::push(self, value)
    }

    /// Read stack slot `idx` as a host value. Inside a host call the
    /// arguments occupy slots `1..=top`.
    pub fn read_arg(&mut self, idx: i32) -> BridgeResult<HostValue> {
        marshal::read(self, idx)
    }

    /// Host value a handle token refers to
    pub fn resolve(&self, token: HandleToken) -> BridgeResult<HostValue> {
        Ok(match self.state.resolve(token)? {
            HandleEntry::Object(obj) => HostValue::Object(obj),
            HandleEntry::Surface(surface) => HostValue::Surface(surface),
        })
    }

    /// Number of live handles
    pub fn handles_live(&self) -> usize {
        self.state.handles.borrow().len()
    }
}
