//! Skein reference VM
//!
//! `MemoryVm` implements the [`skein_sdk::ScriptVm`] stack ABI entirely in
//! memory:
//! - Value stack with per-call frames
//! - String-keyed tables with metatables (`__index`, `__newindex`)
//! - Native closures, protected calls and a bounded call depth
//! - Registry references and a global namespace
//! - Chunk loading through source text registered by the embedder
//!
//! It does not compile source text. `load` looks the source up among the
//! chunks registered with [`MemoryVm::register_chunk`], which lets hosts and
//! tests drive the bridge exactly as compiled script code would.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod base;
mod state;
mod value;

pub use base::open_base;
pub use state::{MemoryVm, DEFAULT_MAX_CALL_DEPTH};
pub use value::{Function, Table, TableRef, Value};
