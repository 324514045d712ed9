//! Minimal base library: `tostring`, `type`, `error`
//!
//! Written purely against the stack ABI so it runs on any `ScriptVm`.

use std::rc::Rc;

use skein_sdk::{display, ScriptError, ScriptVm};


/// Install the base library globals
pub fn open_base(vm: &mut dyn ScriptVm) {
    vm.push_function("tostring", Rc::new(|vm: &mut dyn ScriptVm| -> Result<usize, ScriptError> {
        let text = display(vm, 1)?;
        vm.push_string(text.as_bytes());
        Ok(1)
    }));
    vm.set_global("tostring");

    vm.push_function("type", Rc::new(|vm: &mut dyn ScriptVm| -> Result<usize, ScriptError> {
        let name = vm.type_of(1).name();
        vm.push_string(name.as_bytes());
        Ok(1)
    }));
    vm.set_global("type");

    vm.push_function("error", Rc::new(|vm: &mut dyn ScriptVm| -> Result<usize, ScriptError> {
        let message = display(vm, 1)?;
        Err(ScriptError::new(message))
    }));
    vm.set_global("error");
}
