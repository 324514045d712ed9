//! ScriptVm trait - the stack ABI consumed by the host bridge
//!
//! Index conventions follow the classic register/stack machine model:
//! positive indices count up from the base of the current call frame
//! (1 is the first argument of a running native function), negative
//! indices count down from the top (-1 is the topmost value).

use std::rc::Rc;

use crate::error::{ScriptError, VmResult};
use crate::value::{format_number, ValueType};

/// `nresults` value asking a call to keep every result
pub const MULTRET: i32 = -1;

/// Registry reference that keeps a VM value alive until released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(pub u32);

/// Native function installed into a VM.
///
/// On entry the arguments occupy slots `1..=top()`. The function leaves its
/// results on top of the stack and returns how many there are. Errors are
/// returned, never thrown: the VM raises them as script errors.
pub type NativeFunction = Rc<dyn Fn(&mut dyn ScriptVm) -> Result<usize, ScriptError>>;

/// Abstract script VM session.
///
/// A session is single-threaded and non-reentrant from other native threads.
/// Nested calls (script calls host calls script) are allowed as long as the
/// caller keeps stack discipline: arguments and results always sit on top.
pub trait ScriptVm {
    // ========================================================================
    // Stack Management
    // ========================================================================

    /// Index of the topmost slot in the current frame (0 when empty)
    fn top(&self) -> i32;

    /// Grow (with nils) or shrink the current frame to `idx` slots
    fn set_top(&mut self, idx: i32);

    /// Pop `n` values
    fn pop(&mut self, n: i32) {
        let top = self.top();
        self.set_top(top - n);
    }

    /// Convert a relative index into an absolute one
    fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 {
            idx
        } else {
            self.top() + idx + 1
        }
    }

    /// Type tag of the value at `idx` (`Nil` for empty slots)
    fn type_of(&self, idx: i32) -> ValueType;

    // ========================================================================
    // Pushing
    // ========================================================================

    /// Push nil
    fn push_nil(&mut self);

    /// Push a boolean
    fn push_boolean(&mut self, b: bool);

    /// Push a number
    fn push_number(&mut self, n: f64);

    /// Push an integer (stored with the VM's number representation)
    fn push_integer(&mut self, n: i64);

    /// Push a length-delimited byte string
    fn push_string(&mut self, bytes: &[u8]);

    /// Push a tagged integer-sized token
    fn push_light_userdata(&mut self, payload: u64, tag: u32);

    /// Push a copy of the value at `idx`
    fn push_value(&mut self, idx: i32);

    // ========================================================================
    // Reading
    // ========================================================================

    /// Truthiness of the value at `idx` (nil and false are falsy)
    fn to_boolean(&self, idx: i32) -> bool;

    /// Number at `idx`, only if the slot holds a number
    fn to_number(&self, idx: i32) -> Option<f64>;

    /// Integer at `idx`, only if the slot holds an integral number
    fn to_integer(&self, idx: i32) -> Option<i64>;

    /// Bytes of the string at `idx`
    fn to_bytes(&self, idx: i32) -> Option<Vec<u8>>;

    /// Payload and tag of the light userdata at `idx`
    fn to_light_userdata(&self, idx: i32) -> Option<(u64, u32)>;

    // ========================================================================
    // Tables
    // ========================================================================

    /// Push a new empty table
    fn new_table(&mut self);

    /// Push `t[name]` where `t` is at `idx`, honouring `__index`
    fn get_field(&mut self, idx: i32, name: &str) -> VmResult<ValueType>;

    /// Pop a value and assign `t[name]`, honouring `__newindex`
    fn set_field(&mut self, idx: i32, name: &str) -> VmResult<()>;

    /// Push `t[name]` without metamethods
    fn raw_get_field(&mut self, idx: i32, name: &str) -> ValueType;

    /// Pop a value and assign `t[name]` without metamethods
    fn raw_set_field(&mut self, idx: i32, name: &str);

    /// Pop a table and install it as the metatable of the table at `idx`
    fn set_metatable(&mut self, idx: i32) -> VmResult<()>;

    /// Push the metatable of the value at `idx`; false (nothing pushed) if none
    fn get_metatable(&mut self, idx: i32) -> bool;

    // ========================================================================
    // Globals
    // ========================================================================

    /// Push the global `name`
    fn get_global(&mut self, name: &str) -> ValueType;

    /// Pop a value into the global `name`
    fn set_global(&mut self, name: &str);

    // ========================================================================
    // Functions
    // ========================================================================

    /// Push a native closure
    fn push_function(&mut self, name: &str, function: NativeFunction);

    /// Call the function below `nargs` arguments, leaving `nresults` results
    /// (or all of them with [`MULTRET`]). Errors propagate unprotected.
    fn call(&mut self, nargs: i32, nresults: i32) -> VmResult<()>;

    /// Like [`ScriptVm::call`], but on error the function and its arguments
    /// are removed and the stack is restored.
    fn pcall(&mut self, nargs: i32, nresults: i32) -> VmResult<()>;

    // ========================================================================
    // References
    // ========================================================================

    /// Pin the value at `idx` in the registry
    fn reference(&mut self, idx: i32) -> RefId;

    /// Push a pinned value; false (nil pushed) if the reference is unknown
    fn push_reference(&mut self, reference: RefId) -> bool;

    /// Unpin a registry value
    fn release_reference(&mut self, reference: RefId);

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Load source text as a chunk and push it as a function
    fn load(&mut self, chunk_name: &str, source: &[u8]) -> VmResult<()>;

    /// Tear the session down, invalidating all values and references
    fn close(&mut self);

    /// Check if `close` has been called
    fn is_closed(&self) -> bool;
}

/// Render the value at `idx` the way `print` and `tostring` show it.
///
/// Tables with a `__tostring` metamethod are rendered through it; a failing
/// metamethod leaves the stack balanced and returns its error.
pub fn display(vm: &mut dyn ScriptVm, idx: i32) -> VmResult<String> {
    let idx = vm.abs_index(idx);
    let text = match vm.type_of(idx) {
        ValueType::Nil => "nil".to_string(),
        ValueType::Boolean => vm.to_boolean(idx).to_string(),
        ValueType::Number => format_number(vm.to_number(idx).unwrap_or(0.0)),
        ValueType::String => {
            String::from_utf8_lossy(&vm.to_bytes(idx).unwrap_or_default()).into_owned()
        }
        ValueType::Function => "function".to_string(),
        ValueType::LightUserdata => "userdata".to_string(),
        ValueType::Table => return display_table(vm, idx),
    };
    Ok(text)
}

fn display_table(vm: &mut dyn ScriptVm, idx: i32) -> VmResult<String> {
    if !vm.get_metatable(idx) {
        return Ok("table".to_string());
    }
    if vm.raw_get_field(-1, "__tostring") != ValueType::Function {
        vm.pop(2);
        return Ok("table".to_string());
    }
    vm.push_value(idx);
    let text = vm.pcall(1, 1).and_then(|()| {
        let text = display(vm, -1);
        vm.pop(1);
        text
    });
    // metatable
    vm.pop(1);
    text
}
