//! MemoryVm - the reference stack machine

use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::{
    NativeFunction, RefId, ScriptError, ScriptVm, ValueType, VmError, VmResult, MULTRET,
};

use crate::value::{Function, Table, TableRef, Value};

/// Nested call limit before `VmError::StackOverflow`
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Longest `__index` / `__newindex` table chain followed before giving up
const MAX_META_CHAIN: usize = 100;

/// In-memory script VM session.
///
/// All values live on a single stack; every call pushes a frame whose base
/// is the slot of its first argument. Indices passed through the ABI are
/// resolved against the innermost frame.
pub struct MemoryVm {
    stack: Vec<Value>,
    frames: Vec<usize>,
    globals: TableRef,
    registry: Vec<Option<Value>>,
    free_refs: Vec<u32>,
    chunks: FxHashMap<Vec<u8>, NativeFunction>,
    max_call_depth: usize,
    closed: bool,
}

impl MemoryVm {
    /// Create an empty session
    pub fn new() -> Self {
        Self::with_max_call_depth(DEFAULT_MAX_CALL_DEPTH)
    }

    /// Create a session with a custom nested call limit
    pub fn with_max_call_depth(max_call_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new_ref(),
            registry: Vec::new(),
            free_refs: Vec::new(),
            chunks: FxHashMap::default(),
            max_call_depth,
            closed: false,
        }
    }

    /// Register the executable form of `source`.
    ///
    /// A later `load` of exactly this source text pushes `body` as the chunk
    /// function. This replaces compilation, which the reference VM does not do.
    pub fn register_chunk(
        &mut self,
        source: impl AsRef<[u8]>,
        body: impl Fn(&mut dyn ScriptVm) -> Result<usize, ScriptError> + 'static,
    ) {
        self.chunks
            .insert(source.as_ref().to_vec(), Rc::new(body) as NativeFunction);
    }

    /// Number of live registry references
    pub fn reference_count(&self) -> usize {
        self.registry.iter().filter(|slot| slot.is_some()).count()
    }

    /// Current nesting depth of native calls
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    // ========================================================================
    // Slot Helpers
    // ========================================================================

    fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    fn slot_index(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack.len();
        if idx > 0 {
            let i = base + idx as usize - 1;
            (i < len).then_some(i)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    fn value_at(&self, idx: i32) -> Value {
        self.slot_index(idx)
            .map(|i| self.stack[i].clone())
            .unwrap_or_default()
    }

    fn pop_value(&mut self) -> Value {
        if self.stack.len() > self.base() {
            self.stack.pop().unwrap_or_default()
        } else {
            Value::Nil
        }
    }

    fn check_open(&self) -> VmResult<()> {
        if self.closed {
            Err(VmError::Closed)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn do_call(&mut self, nargs: i32, nresults: i32, protected: bool) -> VmResult<()> {
        self.check_open()?;
        let base = self.base();
        let func_idx = self
            .stack
            .len()
            .checked_sub(nargs.max(0) as usize + 1)
            .filter(|&i| i >= base)
            .ok_or(VmError::InvalidIndex(-(nargs + 1)))?;

        let function = match &self.stack[func_idx] {
            Value::Function(f) => f.clone(),
            other => {
                let err = VmError::TypeError(format!(
                    "attempt to call a {} value",
                    other.value_type().name()
                ));
                if protected {
                    self.stack.truncate(func_idx);
                }
                return Err(err);
            }
        };

        if self.frames.len() >= self.max_call_depth {
            if protected {
                self.stack.truncate(func_idx);
            }
            return Err(VmError::StackOverflow);
        }

        let depth = self.frames.len();
        self.frames.push(func_idx + 1);
        let outcome = {
            let vm: &mut dyn ScriptVm = self;
            (function.body)(vm)
        };
        self.frames.truncate(depth);

        let returned = match outcome {
            Ok(n) => n,
            Err(err) => {
                log::debug!("error in {}: {}", function.name, err);
                if protected {
                    self.stack.truncate(func_idx);
                }
                return Err(VmError::Runtime(err.0));
            }
        };

        // Results are the topmost `returned` values of the callee frame
        let available = self.stack.len().saturating_sub(func_idx + 1);
        let returned = returned.min(available);
        let first = self.stack.len() - returned;
        let mut results: Vec<Value> = self.stack.drain(first..).collect();
        self.stack.truncate(func_idx);

        if nresults != MULTRET {
            results.resize(nresults.max(0) as usize, Value::Nil);
        }
        self.stack.extend(results);
        Ok(())
    }

    /// Call `function` with `args`, returning exactly `nresults` values
    fn call_value(
        &mut self,
        function: Value,
        args: Vec<Value>,
        nresults: usize,
    ) -> VmResult<Vec<Value>> {
        let nargs = args.len() as i32;
        let base = self.stack.len();
        self.stack.push(function);
        self.stack.extend(args);
        if let Err(err) = self.do_call(nargs, nresults as i32, false) {
            // Metamethod calls leave no residue behind
            self.stack.truncate(base);
            return Err(err);
        }
        let first = self.stack.len() - nresults;
        Ok(self.stack.drain(first..).collect())
    }

    // ========================================================================
    // Metamethod-aware Indexing
    // ========================================================================

    fn index(&mut self, target: Value, key: &str) -> VmResult<Value> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let table = t.borrow();
                    let raw = table.get(key.as_bytes());
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    table.metamethod("__index")
                }
                other => {
                    return Err(VmError::TypeError(format!(
                        "attempt to index a {} value with '{}'",
                        other.value_type().name(),
                        key
                    )))
                }
            };

            match handler {
                Value::Nil => return Ok(Value::Nil),
                Value::Function(_) => {
                    let args = vec![current, Value::string(key.as_bytes())];
                    let mut results = self.call_value(handler, args, 1)?;
                    return Ok(results.pop().unwrap_or_default());
                }
                Value::Table(_) => current = handler,
                other => {
                    return Err(VmError::TypeError(format!(
                        "invalid __index handler of type {}",
                        other.value_type().name()
                    )))
                }
            }
        }
        Err(VmError::Runtime("'__index' chain too long".to_string()))
    }

    fn new_index(&mut self, target: Value, key: &str, value: Value) -> VmResult<()> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let table = t.borrow();
                    if table.contains(key.as_bytes()) {
                        Value::Nil
                    } else {
                        table.metamethod("__newindex")
                    }
                }
                other => {
                    return Err(VmError::TypeError(format!(
                        "attempt to index a {} value with '{}'",
                        other.value_type().name(),
                        key
                    )))
                }
            };

            match handler {
                Value::Nil => {
                    if let Value::Table(t) = &current {
                        t.borrow_mut().set(key.as_bytes(), value);
                    }
                    return Ok(());
                }
                Value::Function(_) => {
                    let args = vec![current, Value::string(key.as_bytes()), value];
                    self.call_value(handler, args, 0)?;
                    return Ok(());
                }
                Value::Table(_) => current = handler,
                other => {
                    return Err(VmError::TypeError(format!(
                        "invalid __newindex handler of type {}",
                        other.value_type().name()
                    )))
                }
            }
        }
        Err(VmError::Runtime("'__newindex' chain too long".to_string()))
    }
}

impl Default for MemoryVm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVm")
            .field("stack", &self.stack.len())
            .field("frames", &self.frames.len())
            .field("references", &self.reference_count())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ScriptVm for MemoryVm {
    fn top(&self) -> i32 {
        (self.stack.len() - self.base()) as i32
    }

    fn set_top(&mut self, idx: i32) {
        let base = self.base();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (self.stack.len() as i64 + idx as i64 + 1).max(base as i64) as usize
        };
        self.stack.resize(new_len, Value::Nil);
    }

    fn type_of(&self, idx: i32) -> ValueType {
        self.slot_index(idx)
            .map(|i| self.stack[i].value_type())
            .unwrap_or(ValueType::Nil)
    }

    fn push_nil(&mut self) {
        self.stack.push(Value::Nil);
    }

    fn push_boolean(&mut self, b: bool) {
        self.stack.push(Value::Boolean(b));
    }

    fn push_number(&mut self, n: f64) {
        self.stack.push(Value::Number(n));
    }

    fn push_integer(&mut self, n: i64) {
        self.stack.push(Value::Number(n as f64));
    }

    fn push_string(&mut self, bytes: &[u8]) {
        self.stack.push(Value::string(bytes));
    }

    fn push_light_userdata(&mut self, payload: u64, tag: u32) {
        self.stack.push(Value::LightUserdata { payload, tag });
    }

    fn push_value(&mut self, idx: i32) {
        let value = self.value_at(idx);
        self.stack.push(value);
    }

    fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    fn to_number(&self, idx: i32) -> Option<f64> {
        match self.value_at(idx) {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    fn to_integer(&self, idx: i32) -> Option<i64> {
        match self.value_at(idx) {
            Value::Number(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
                Some(n as i64)
            }
            _ => None,
        }
    }

    fn to_bytes(&self, idx: i32) -> Option<Vec<u8>> {
        match self.value_at(idx) {
            Value::String(s) => Some(s.to_vec()),
            _ => None,
        }
    }

    fn to_light_userdata(&self, idx: i32) -> Option<(u64, u32)> {
        match self.value_at(idx) {
            Value::LightUserdata { payload, tag } => Some((payload, tag)),
            _ => None,
        }
    }

    fn new_table(&mut self) {
        self.stack.push(Value::Table(Table::new_ref()));
    }

    fn get_field(&mut self, idx: i32, name: &str) -> VmResult<ValueType> {
        self.check_open()?;
        let target = self.value_at(idx);
        let value = self.index(target, name)?;
        let ty = value.value_type();
        self.stack.push(value);
        Ok(ty)
    }

    fn set_field(&mut self, idx: i32, name: &str) -> VmResult<()> {
        self.check_open()?;
        let target = self.value_at(idx);
        let value = self.pop_value();
        self.new_index(target, name, value)
    }

    fn raw_get_field(&mut self, idx: i32, name: &str) -> ValueType {
        let value = match self.value_at(idx) {
            Value::Table(t) => t.borrow().get(name.as_bytes()),
            _ => Value::Nil,
        };
        let ty = value.value_type();
        self.stack.push(value);
        ty
    }

    fn raw_set_field(&mut self, idx: i32, name: &str) {
        let target = self.value_at(idx);
        let value = self.pop_value();
        if let Value::Table(t) = target {
            t.borrow_mut().set(name.as_bytes(), value);
        }
    }

    fn set_metatable(&mut self, idx: i32) -> VmResult<()> {
        let target = self.value_at(idx);
        let meta = self.pop_value();
        match (target, meta) {
            (Value::Table(t), Value::Table(m)) => {
                t.borrow_mut().metatable = Some(m);
                Ok(())
            }
            (Value::Table(t), Value::Nil) => {
                t.borrow_mut().metatable = None;
                Ok(())
            }
            (target, _) => Err(VmError::TypeError(format!(
                "cannot set a metatable on a {} value",
                target.value_type().name()
            ))),
        }
    }

    fn get_metatable(&mut self, idx: i32) -> bool {
        let meta = match self.value_at(idx) {
            Value::Table(t) => t.borrow().metatable.clone(),
            _ => None,
        };
        match meta {
            Some(m) => {
                self.stack.push(Value::Table(m));
                true
            }
            None => false,
        }
    }

    fn get_global(&mut self, name: &str) -> ValueType {
        let value = self.globals.borrow().get(name.as_bytes());
        let ty = value.value_type();
        self.stack.push(value);
        ty
    }

    fn set_global(&mut self, name: &str) {
        let value = self.pop_value();
        self.globals.borrow_mut().set(name.as_bytes(), value);
    }

    fn push_function(&mut self, name: &str, function: NativeFunction) {
        self.stack
            .push(Value::Function(Rc::new(Function::new(name, function))));
    }

    fn call(&mut self, nargs: i32, nresults: i32) -> VmResult<()> {
        self.do_call(nargs, nresults, false)
    }

    fn pcall(&mut self, nargs: i32, nresults: i32) -> VmResult<()> {
        self.do_call(nargs, nresults, true)
    }

    fn reference(&mut self, idx: i32) -> RefId {
        let value = self.value_at(idx);
        match self.free_refs.pop() {
            Some(slot) => {
                self.registry[slot as usize] = Some(value);
                RefId(slot)
            }
            None => {
                self.registry.push(Some(value));
                RefId((self.registry.len() - 1) as u32)
            }
        }
    }

    fn push_reference(&mut self, reference: RefId) -> bool {
        match self.registry.get(reference.0 as usize).cloned().flatten() {
            Some(value) => {
                self.stack.push(value);
                true
            }
            None => {
                self.stack.push(Value::Nil);
                false
            }
        }
    }

    fn release_reference(&mut self, reference: RefId) {
        if let Some(slot) = self.registry.get_mut(reference.0 as usize) {
            if slot.take().is_some() {
                self.free_refs.push(reference.0);
            }
        }
    }

    fn load(&mut self, chunk_name: &str, source: &[u8]) -> VmResult<()> {
        self.check_open()?;
        match self.chunks.get(source).cloned() {
            Some(body) => {
                self.push_function(chunk_name, body);
                Ok(())
            }
            None => Err(VmError::Syntax {
                chunk: chunk_name.to_string(),
                message: "no executable chunk registered for this source".to_string(),
            }),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        log::debug!(
            "closing vm: {} stack slots, {} references",
            self.stack.len(),
            self.reference_count()
        );
        self.stack.clear();
        self.frames.clear();
        self.globals = Table::new_ref();
        self.registry.clear();
        self.free_refs.clear();
        self.chunks.clear();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
