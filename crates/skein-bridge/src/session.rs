//! Session: one script VM plus the bridge state that serves it
//!
//! A session owns the VM, forwards host types and values into it, loads and
//! runs chunks, and tears everything down exactly once.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::{HandleToken, RefId, ScriptVm, VmError};

use crate::codec;
use crate::context::{BridgeState, CallContext};
use crate::error::{BridgeError, BridgeResult};
use crate::function::{native, HostFunction};
use crate::handles::HandleEntry;
use crate::host::{HostObject, HostValue};
use crate::surface::StaticSurface;
use crate::types::{TypeBuilder, TypeDescriptor};

/// Receiver for text the session writes out
pub type OutputSink = Rc<dyn Fn(&str)>;

/// What happens when a type is forwarded a second time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateForward {
    /// Replace the previous surface and release its handle
    #[default]
    Replace,
    /// Fail with `DuplicateForward`
    Reject,
}

/// Session configuration
#[derive(Clone)]
pub struct SessionOptions {
    /// Receives each line written by the script global `print`
    pub print: OutputSink,

    /// Receives load and runtime failures of `do_text` / `execute`
    pub error: OutputSink,

    /// Install the `print` global
    pub install_print: bool,

    /// Policy for forwarding a type twice
    pub duplicate_forward: DuplicateForward,

    /// Cap on simultaneously live handles
    pub max_handles: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            print: Rc::new(|line| println!("{}", line)),
            error: Rc::new(|message| eprintln!("{}", message)),
            install_print: true,
            duplicate_forward: DuplicateForward::default(),
            max_handles: None,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("install_print", &self.install_print)
            .field("duplicate_forward", &self.duplicate_forward)
            .field("max_handles", &self.max_handles)
            .finish_non_exhaustive()
    }
}

/// A script VM with the host bridge installed
pub struct Session {
    vm: Box<dyn ScriptVm>,
    state: Rc<BridgeState>,
    options: SessionOptions,
    surfaces: FxHashMap<TypeId, Rc<StaticSurface>>,
    chunk: Option<RefId>,
    torn_down: bool,
}

impl Session {
    /// Wrap `vm` in a new session
    pub fn new(vm: impl ScriptVm + 'static, options: SessionOptions) -> Self {
        let mut session = Self {
            vm: Box::new(vm),
            state: Rc::new(BridgeState::new(options.max_handles)),
            options,
            surfaces: FxHashMap::default(),
            chunk: None,
            torn_down: false,
        };
        if session.options.install_print {
            session.install_print();
        }
        session
    }

    fn install_print(&mut self) {
        let sink = Rc::clone(&self.options.print);
        let print = native(&self.state, move |cx| {
            let vm = cx.vm();
            let top = vm.top();
            let line = (1..=top)
                .map(|idx| codec::display(vm, idx))
                .collect::<Vec<_>>()
                .join("\t");
            sink(&line);
            Ok(0)
        });
        self.vm.push_function("print", print);
        self.vm.set_global("print");
    }

    /// Context for calling into the bridge from host code
    pub fn context(&mut self) -> CallContext<'_> {
        CallContext::new(&mut *self.vm, Rc::clone(&self.state))
    }

    /// The underlying VM
    pub fn vm_mut(&mut self) -> &mut dyn ScriptVm {
        &mut *self.vm
    }

    fn check_open(&self) -> BridgeResult<()> {
        if self.torn_down {
            return Err(VmError::Closed.into());
        }
        Ok(())
    }

    fn check_duplicate(&self, type_id: TypeId) -> BridgeResult<()> {
        if self.options.duplicate_forward == DuplicateForward::Reject {
            if let Some(existing) = self.state.types.borrow().get(type_id) {
                return Err(BridgeError::DuplicateForward(existing.name().to_string()));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Forwarding
    // ========================================================================

    /// Register `T` so its values can cross the bridge, without publishing
    /// a static surface
    pub fn register_type<T: Any>(
        &mut self,
        builder: TypeBuilder<T>,
    ) -> BridgeResult<Rc<TypeDescriptor>> {
        self.check_open()?;
        self.check_duplicate(TypeId::of::<T>())?;
        let descriptor = self.state.types.borrow_mut().register(builder.build());
        log::debug!("Registered {} (tag {})", descriptor.name(), descriptor.tag());
        Ok(descriptor)
    }

    /// Register `T` and publish its static surface as a global named after
    /// the type
    pub fn forward_type<T: Any>(
        &mut self,
        builder: TypeBuilder<T>,
    ) -> BridgeResult<Rc<StaticSurface>> {
        let type_id = TypeId::of::<T>();
        let descriptor = self.register_type(builder)?;

        // The old surface stays published until the new one is live
        let surface = Rc::new(StaticSurface::build(&descriptor));
        self.set_global(descriptor.name(), HostValue::Surface(Rc::clone(&surface)))?;

        if let Some(previous) = self.surfaces.insert(type_id, Rc::clone(&surface)) {
            if let Some(token) = previous.token() {
                self.state.release(&mut *self.vm, token);
            }
            if previous.type_name() != descriptor.name() {
                self.vm.push_nil();
                self.vm.set_global(previous.type_name());
            }
            log::debug!("Replaced surface of {}", previous.type_name());
        }
        log::debug!(
            "Forwarded {} with {} static member(s)",
            descriptor.name(),
            surface.member_names().len()
        );
        Ok(surface)
    }

    /// Static surface published for `T`
    pub fn surface<T: Any>(&self) -> Option<Rc<StaticSurface>> {
        self.surfaces.get(&TypeId::of::<T>()).cloned()
    }

    /// Member directory registered for `T`
    pub fn descriptor<T: Any>(&self) -> Option<Rc<TypeDescriptor>> {
        self.state.types.borrow().lookup::<T>()
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Publish a host callable as a global function
    pub fn push_function(&mut self, name: &str, function: HostFunction) -> BridgeResult<()> {
        self.set_global(name, HostValue::Callable(function))
    }

    /// Publish a host value of a forwarded type as a global object.
    ///
    /// Returns the shared object; changes made by scripts are visible
    /// through it.
    pub fn push_object<T: Any>(&mut self, name: &str, value: T) -> BridgeResult<HostObject> {
        self.check_open()?;
        let object = self.context().try_wrap(value)?;
        self.set_global(name, HostValue::Object(object.clone()))?;
        Ok(object)
    }

    /// Assign a global
    pub fn set_global(&mut self, name: &str, value: HostValue) -> BridgeResult<()> {
        self.check_open()?;
        let mut cx = self.context();
        cx.push(&value)?;
        cx.vm().set_global(name);
        Ok(())
    }

    /// Read a global
    pub fn get_global(&mut self, name: &str) -> BridgeResult<HostValue> {
        self.check_open()?;
        let mut cx = self.context();
        cx.vm().get_global(name);
        let value = cx.read_arg(-1);
        cx.vm().pop(1);
        value
    }

    // ========================================================================
    // Running scripts
    // ========================================================================

    /// Load `source` as the next chunk to run.
    ///
    /// Load failures go to the error sink and are returned.
    pub fn do_text(&mut self, chunk_name: &str, source: &str) -> BridgeResult<()> {
        self.check_open()?;
        if let Err(e) = self.vm.load(chunk_name, source.as_bytes()) {
            return Err(self.report(e));
        }
        let chunk = self.vm.reference(-1);
        self.vm.pop(1);
        if let Some(stale) = self.chunk.replace(chunk) {
            log::debug!("Discarding a loaded chunk that never ran");
            self.vm.release_reference(stale);
        }
        Ok(())
    }

    /// Run the chunk loaded by [`Session::do_text`] in protected mode.
    ///
    /// Script errors go to the error sink and are returned.
    pub fn execute(&mut self) -> BridgeResult<()> {
        self.check_open()?;
        let chunk = match self.chunk.take() {
            Some(chunk) => chunk,
            None => return Err(self.report(VmError::Runtime("no chunk loaded".to_string()))),
        };
        self.vm.push_reference(chunk);
        self.vm.release_reference(chunk);
        match self.vm.pcall(0, 0) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.report(e)),
        }
    }

    /// Load and run `source`
    pub fn run(&mut self, chunk_name: &str, source: &str) -> BridgeResult<()> {
        self.do_text(chunk_name, source)?;
        self.execute()
    }

    /// Call the global function `name` and return its first result
    pub fn call_global(&mut self, name: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        self.check_open()?;
        let mut cx = self.context();
        let base = cx.vm().top();
        cx.vm().get_global(name);
        for value in args {
            if let Err(e) = cx.push(value) {
                cx.vm().set_top(base);
                return Err(e);
            }
        }
        cx.vm().pcall(args.len() as i32, 1)?;
        let result = cx.read_arg(-1);
        cx.vm().set_top(base);
        result
    }

    fn report(&self, e: VmError) -> BridgeError {
        log::error!("{}", e);
        (self.options.error)(&e.to_string());
        e.into()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Host value a token refers to
    pub fn resolve(&self, token: HandleToken) -> BridgeResult<HostValue> {
        self.state.handles.borrow().resolve(token).map(|entry| match entry {
            HandleEntry::Object(obj) => HostValue::Object(obj),
            HandleEntry::Surface(surface) => HostValue::Surface(surface),
        })
    }

    /// Number of live handles
    pub fn handles_live(&self) -> usize {
        self.state.handles.borrow().len()
    }

    /// Number of script functions held by the host and not yet disposed
    pub fn live_script_functions(&self) -> usize {
        self.state.live_functions.get()
    }

    /// Check if [`Session::teardown`] has run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release every handle and close the VM. Runs once; later calls and
    /// the drop that follows do nothing.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(chunk) = self.chunk.take() {
            self.vm.release_reference(chunk);
        }
        let released = self.state.handles.borrow_mut().release_all();
        self.state.proxies.borrow_mut().clear();
        let leaked = self.state.live_functions.get();
        if leaked > 0 {
            log::warn!("{} script function(s) were never disposed", leaked);
        }
        self.surfaces.clear();
        self.vm.close();
        log::debug!("Session torn down, {} handle(s) released", released);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handles_live", &self.handles_live())
            .field("surfaces", &self.surfaces.len())
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}
