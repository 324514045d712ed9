//! Static surfaces
//!
//! A forwarded type appears to scripts as a global table: its static
//! fields, properties, constants and methods, plus a `new` member that runs
//! the type's constructors. Each member is compiled once into a [`Thunk`]
//! when the type is forwarded.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::HandleToken;

use crate::context::CallContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostType, HostValue};
use crate::overload::{coerce, select, Selection};
use crate::types::{StaticAccessor, StaticMethod, TypeDescriptor};

/// Script-visible name of the constructor member
pub const CONSTRUCTOR_NAME: &str = "new";

/// Direction of a field or property access
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Return the current value
    Read,
    /// Assign the given value
    Write(HostValue),
}

/// Accessor for a static field or property
pub type AccessorThunk = Rc<dyn Fn(&mut CallContext<'_>, Access) -> BridgeResult<HostValue>>;

/// Invoker for static methods and constructors; `None` for void results
pub type MethodThunk =
    Rc<dyn Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<Option<HostValue>>>;

/// Precompiled static member
#[derive(Clone)]
pub enum Thunk {
    /// Static field or constant
    Field(AccessorThunk),
    /// Static property
    Property(AccessorThunk),
    /// Static method with all its overloads
    Method(MethodThunk),
    /// Constructor set
    Constructor(MethodThunk),
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thunk::Field(_) => write!(f, "Field"),
            Thunk::Property(_) => write!(f, "Property"),
            Thunk::Method(_) => write!(f, "Method"),
            Thunk::Constructor(_) => write!(f, "Constructor"),
        }
    }
}

fn accessor_fn<F>(f: F) -> AccessorThunk
where
    F: Fn(&mut CallContext<'_>, Access) -> BridgeResult<HostValue> + 'static,
{
    Rc::new(f)
}

fn method_fn<F>(f: F) -> MethodThunk
where
    F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<Option<HostValue>> + 'static,
{
    Rc::new(f)
}

/// Script-visible namespace of a forwarded type
pub struct StaticSurface {
    descriptor: Rc<TypeDescriptor>,
    members: FxHashMap<String, Thunk>,
    token: Cell<Option<HandleToken>>,
}

impl StaticSurface {
    /// Compile the static members of `descriptor`
    pub fn build(descriptor: &Rc<TypeDescriptor>) -> Self {
        let mut members = FxHashMap::default();
        let mut insert = |name: &str, thunk: Thunk| {
            if let Some(previous) = members.insert(name.to_string(), thunk) {
                log::debug!(
                    "{}.{}: {:?} shadowed by a later member",
                    descriptor.name(),
                    name,
                    previous
                );
            }
        };

        for (name, accessor) in &descriptor.static_fields {
            insert(name.as_str(), Thunk::Field(accessor_thunk(name, accessor.clone())));
        }
        for (name, accessor) in &descriptor.static_properties {
            insert(name.as_str(), Thunk::Property(accessor_thunk(name, accessor.clone())));
        }
        for (name, overloads) in &descriptor.static_methods {
            insert(name.as_str(), Thunk::Method(method_thunk(name, overloads.clone())));
        }
        if !descriptor.constructors.is_empty() {
            insert(
                CONSTRUCTOR_NAME,
                Thunk::Constructor(constructor_thunk(Rc::clone(descriptor))),
            );
        }

        Self {
            descriptor: Rc::clone(descriptor),
            members,
            token: Cell::new(None),
        }
    }

    /// Name of the forwarded type
    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Handle tag of the forwarded type
    pub fn tag(&self) -> u32 {
        self.descriptor.tag()
    }

    /// Member directory of the forwarded type
    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    /// Look up a member
    pub fn member(&self, name: &str) -> Option<&Thunk> {
        self.members.get(name)
    }

    /// Sorted member names
    pub fn member_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.members.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Token the surface is currently published under
    pub fn token(&self) -> Option<HandleToken> {
        self.token.get()
    }

    pub(crate) fn set_token(&self, token: HandleToken) {
        self.token.set(Some(token));
    }
}

impl fmt::Debug for StaticSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSurface")
            .field("type_name", &self.type_name())
            .field("members", &self.member_names())
            .field("token", &self.token.get())
            .finish()
    }
}

fn accessor_thunk(name: &str, accessor: StaticAccessor) -> AccessorThunk {
    let name = name.to_string();
    accessor_fn(move |_cx, access| match access {
        Access::Read => Ok(accessor.get.as_ref().map_or(HostValue::Nil, |get| get())),
        Access::Write(value) => {
            let set = accessor
                .set
                .as_ref()
                .ok_or_else(|| BridgeError::ReadOnlyMemberWrite {
                    member: name.clone(),
                })?;
            let value = coerce(&value, &accessor.ty)
                .ok_or_else(|| BridgeError::mismatch(accessor.ty.name(), value.type_name()))?;
            set(value)?;
            Ok(HostValue::Nil)
        }
    })
}

fn method_thunk(name: &str, overloads: Vec<StaticMethod>) -> MethodThunk {
    let name = name.to_string();
    method_fn(move |cx, args| {
        let candidates: Vec<&[HostType]> = overloads
            .iter()
            .map(|m| m.signature.params.as_slice())
            .collect();
        let Selection { index, args } = select(&name, &candidates, args)?;
        let method = &overloads[index];
        let result = (method.invoke)(cx, &args)?;
        Ok(method.signature.returns_value.then_some(result))
    })
}

fn constructor_thunk(descriptor: Rc<TypeDescriptor>) -> MethodThunk {
    method_fn(move |cx, args| {
        let constructors = &descriptor.constructors;
        let trailing_nil = args.last().map_or(false, HostValue::is_nil);
        let arity_fits = constructors.iter().any(|c| {
            c.params.len() == args.len() || (trailing_nil && c.params.len() + 1 == args.len())
        });
        if !arity_fits {
            return Err(BridgeError::ConstructionFailure {
                type_name: descriptor.name().to_string(),
                arg_count: args.len(),
            });
        }

        let candidates: Vec<&[HostType]> =
            constructors.iter().map(|c| c.params.as_slice()).collect();
        let Selection { index, args } = select(CONSTRUCTOR_NAME, &candidates, args)?;
        let object = (constructors[index].invoke)(cx, &descriptor, &args)?;
        log::trace!("Constructed {}", descriptor.name());
        Ok(Some(HostValue::Object(object)))
    })
}
