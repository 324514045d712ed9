//! Skein Bridge - host object marshalling for embedded script VMs
//!
//! This crate exposes host values, dictionaries, callables and whole types
//! to scripts running in a [`ScriptVm`], and lets scripts call back into the
//! host:
//! - Value codec for primitive stack slots
//! - Generational handle registry for opaque host objects
//! - Member access bridge behind the `__index` / `__newindex` hooks
//! - Overload resolution over declared host signatures
//! - Static surfaces: script-visible namespaces for host types
//! - Function bridge in both directions
//!
//! # Example
//!
//! ```ignore
//! use skein_bridge::{Session, SessionOptions, TypeBuilder, HostType, arg};
//!
//! #[derive(Default)]
//! struct Counter { value: i64 }
//!
//! let mut session = Session::new(skein_vm::MemoryVm::new(), SessionOptions::default());
//! session.forward_type(
//!     TypeBuilder::<Counter>::new("Counter")
//!         .default_constructor()
//!         .field("Value", |c: &Counter| c.value, |c: &mut Counter, v: i64| c.value = v)
//!         .action("Add", &[HostType::Int], |_cx, c: &mut Counter, args| {
//!             c.value += arg::<i64>(args, 0)?;
//!             Ok(())
//!         }),
//! )?;
//! ```
//!
//! [`ScriptVm`]: skein_sdk::ScriptVm

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod context;
pub mod error;
pub mod function;
pub mod handles;
pub mod host;
pub mod marshal;
pub mod member;
pub mod overload;
pub mod session;
pub mod surface;
pub mod types;

pub use context::CallContext;
pub use error::{BridgeError, BridgeResult};
pub use function::{HostFunction, ScriptFunction};
pub use handles::{HandleEntry, HandleRegistry, UNTYPED_TAG};
pub use host::{arg, FromHost, HostDictionary, HostObject, HostType, HostValue, IntoHost};
pub use member::{BridgeTarget, MemberRead, WriteOutcome};
pub use overload::{coerce, select, Selection};
pub use session::{DuplicateForward, OutputSink, Session, SessionOptions};
pub use surface::{Access, StaticSurface, Thunk};
pub use types::{MemberKind, Signature, TypeBuilder, TypeDescriptor, TypeRegistry};

// Re-export SDK types used in the public API
pub use skein_sdk::{HandleToken, ScriptValue, ScriptVm, VmError};
