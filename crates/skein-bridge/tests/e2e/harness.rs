//! Test harness for driving the bridge from script code
//!
//! The reference VM does not compile source text. Each test registers a
//! chunk body under its source string, and the body performs the stack
//! operations the compiled script would. Script locals are kept in globals
//! so the helpers can refer to them by name.

use std::cell::RefCell;
use std::rc::Rc;

use skein_bridge::codec;
use skein_bridge::{Session, SessionOptions};
use skein_sdk::{NativeFunction, ScriptError, ScriptVm, VmError, VmResult};
use skein_vm::MemoryVm;

/// Result of a chunk body
pub type ChunkResult = Result<usize, ScriptError>;

/// Argument pushed by a helper
pub enum Arg {
    Nil,
    Bool(bool),
    Num(f64),
    Str(&'static str),
    /// Value of a global
    Global(&'static str),
    /// Script function literal
    Func(NativeFunction),
}

/// Build a native function with the VM signature
pub fn native<F>(f: F) -> NativeFunction
where
    F: Fn(&mut dyn ScriptVm) -> ChunkResult + 'static,
{
    Rc::new(f)
}

/// Enable log output for a test run; repeated calls are harmless
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Output capture
// ============================================================================

/// Lines written to the print and error sinks
#[derive(Clone, Default)]
pub struct Capture {
    pub lines: Rc<RefCell<Vec<String>>>,
    pub errors: Rc<RefCell<Vec<String>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session options writing into this capture
    pub fn options(&self) -> SessionOptions {
        let lines = Rc::clone(&self.lines);
        let errors = Rc::clone(&self.errors);
        SessionOptions {
            print: Rc::new(move |line| lines.borrow_mut().push(line.to_string())),
            error: Rc::new(move |message| errors.borrow_mut().push(message.to_string())),
            ..SessionOptions::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

/// Session over a VM that knows `source` as an executable chunk
pub fn session_with<F>(source: &str, body: F, options: SessionOptions) -> Session
where
    F: Fn(&mut dyn ScriptVm) -> ChunkResult + 'static,
{
    init_logging();
    let mut vm = MemoryVm::new();
    vm.register_chunk(source, body);
    Session::new(vm, options)
}

// ============================================================================
// Script operations
// ============================================================================

pub fn push_arg(vm: &mut dyn ScriptVm, arg: &Arg) {
    match arg {
        Arg::Nil => vm.push_nil(),
        Arg::Bool(b) => vm.push_boolean(*b),
        Arg::Num(n) => vm.push_number(*n),
        Arg::Str(s) => vm.push_string(s.as_bytes()),
        Arg::Global(name) => {
            vm.get_global(name);
        }
        Arg::Func(f) => vm.push_function("anonymous", Rc::clone(f)),
    }
}

fn push_args(vm: &mut dyn ScriptVm, args: &[Arg]) -> i32 {
    for arg in args {
        push_arg(vm, arg);
    }
    args.len() as i32
}

/// Drop everything above `base` except the topmost value
fn keep_top(vm: &mut dyn ScriptVm, base: i32) {
    let result = vm.reference(-1);
    vm.set_top(base);
    vm.push_reference(result);
    vm.release_reference(result);
}

/// `receiver.name`, left on top
pub fn get(vm: &mut dyn ScriptVm, receiver: &str, name: &str) -> VmResult<()> {
    let base = vm.top();
    vm.get_global(receiver);
    vm.get_field(-1, name)?;
    keep_top(vm, base);
    Ok(())
}

/// `receiver.name = value`
pub fn set(vm: &mut dyn ScriptVm, receiver: &str, name: &str, value: Arg) -> VmResult<()> {
    let base = vm.top();
    vm.get_global(receiver);
    push_arg(vm, &value);
    let result = vm.set_field(-2, name);
    vm.set_top(base);
    result
}

/// `receiver:name(args)`, first result left on top
pub fn invoke(vm: &mut dyn ScriptVm, receiver: &str, name: &str, args: &[Arg]) -> VmResult<()> {
    let base = vm.top();
    vm.get_global(receiver);
    let object = vm.top();
    vm.get_field(object, name)?;
    vm.push_value(object);
    let nargs = push_args(vm, args);
    vm.call(nargs + 1, 1)?;
    keep_top(vm, base);
    Ok(())
}

/// `receiver.name(args)`, first result left on top
pub fn call_field(vm: &mut dyn ScriptVm, receiver: &str, name: &str, args: &[Arg]) -> VmResult<()> {
    let base = vm.top();
    vm.get_global(receiver);
    vm.get_field(-1, name)?;
    let nargs = push_args(vm, args);
    vm.call(nargs, 1)?;
    keep_top(vm, base);
    Ok(())
}

/// `name(args)`, first result left on top
pub fn call_global(vm: &mut dyn ScriptVm, name: &str, args: &[Arg]) -> VmResult<()> {
    vm.get_global(name);
    let nargs = push_args(vm, args);
    vm.call(nargs, 1)
}

/// Pop the top value into global `name`
pub fn local(vm: &mut dyn ScriptVm, name: &str) {
    vm.set_global(name);
}

/// `print(args)`
pub fn print(vm: &mut dyn ScriptVm, args: &[Arg]) -> VmResult<()> {
    vm.get_global("print");
    let nargs = push_args(vm, args);
    vm.call(nargs, 0)
}

/// Pop the top value and print it
pub fn print_top(vm: &mut dyn ScriptVm) -> VmResult<()> {
    vm.get_global("print");
    vm.push_value(-2);
    vm.call(1, 0)?;
    vm.pop(1);
    Ok(())
}

/// Pop the top value as display text, like `tostring`
pub fn pop_text(vm: &mut dyn ScriptVm) -> String {
    let text = codec::display(vm, -1);
    vm.pop(1);
    text
}

/// Run `body` in protected mode; the error message if it failed
pub fn protected<F>(vm: &mut dyn ScriptVm, body: F) -> Option<String>
where
    F: Fn(&mut dyn ScriptVm) -> VmResult<()> + 'static,
{
    let base = vm.top();
    vm.push_function(
        "protected",
        native(move |vm| {
            body(vm)?;
            Ok(0)
        }),
    );
    let outcome = vm.pcall(0, 0);
    assert_eq!(vm.top(), base, "protected call left values behind");
    match outcome {
        Ok(()) => None,
        Err(VmError::Runtime(message)) => Some(message),
        Err(other) => Some(other.to_string()),
    }
}
