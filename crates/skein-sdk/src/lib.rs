//! Skein SDK - the boundary between a script VM and its host
//!
//! This crate defines the fixed stack-manipulation ABI that every Skein
//! script VM implements, together with the value model used when values
//! cross between host code and script code. The host bridge programs
//! against [`ScriptVm`] only; it never sees VM internals.
//!
//! # Example
//!
//! ```ignore
//! use skein_sdk::{ScriptVm, NativeFunction, ScriptError};
//! use std::rc::Rc;
//!
//! fn install_answer(vm: &mut dyn ScriptVm) {
//!     let answer: NativeFunction = Rc::new(|vm: &mut dyn ScriptVm| {
//!         vm.push_number(42.0);
//!         Ok(1)
//!     });
//!     vm.push_function("answer", answer);
//!     vm.set_global("answer");
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod value;
pub mod vm;

pub use error::{ScriptError, VmError, VmResult};
pub use value::{format_number, FunctionRef, HandleToken, ScriptValue, ValueType};
pub use vm::{display, NativeFunction, RefId, ScriptVm, MULTRET};
