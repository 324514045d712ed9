//! Member directories for forwarded host types
//!
//! Host types are described explicitly with a [`TypeBuilder`] instead of being
//! discovered at runtime. The resulting [`TypeDescriptor`] is the type's
//! member directory: instance fields, properties and overloaded methods,
//! plus the static members, constants and constructors that make up its
//! static surface.
//!
//! ```ignore
//! let descriptor = TypeBuilder::<Player>::new("Player")
//!     .constructor(&[HostType::String], |_cx, args| Ok(Player::new(arg(args, 0)?)))
//!     .field("Name", |p: &Player| p.name.clone(), |p: &mut Player, v: String| p.name = v)
//!     .readonly_property("Score", |p: &Player| p.score)
//!     .method("Greet", &[], |_cx, p: &mut Player, _args| Ok(format!("hi {}", p.name)))
//!     .constant("MAX_LEVEL", 99)
//!     .build();
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::context::CallContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handles::UNTYPED_TAG;
use crate::host::{FromHost, HostDictionary, HostObject, HostType, HostValue, IntoHost};

pub(crate) type Getter = Rc<dyn Fn(&dyn Any) -> BridgeResult<HostValue>>;
pub(crate) type Setter = Rc<dyn Fn(&mut dyn Any, HostValue) -> BridgeResult<()>>;
pub(crate) type StaticGetter = Rc<dyn Fn() -> HostValue>;
pub(crate) type StaticSetter = Rc<dyn Fn(HostValue) -> BridgeResult<()>>;
pub(crate) type InstanceInvoke =
    Rc<dyn Fn(&mut CallContext<'_>, &HostObject, &[HostValue]) -> BridgeResult<HostValue>>;
pub(crate) type StaticInvoke =
    Rc<dyn Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<HostValue>>;
pub(crate) type ConstructInvoke = Rc<
    dyn Fn(&mut CallContext<'_>, &Rc<TypeDescriptor>, &[HostValue]) -> BridgeResult<HostObject>,
>;

// ============================================================================
// Member entries
// ============================================================================

/// Parameter list and return shape of one overload
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Declared parameter types, in order
    pub params: Vec<HostType>,
    /// False for callables that return nothing
    pub returns_value: bool,
}

impl Signature {
    /// Create a signature
    pub fn new(params: &[HostType], returns_value: bool) -> Self {
        Self {
            params: params.to_vec(),
            returns_value,
        }
    }
}

/// Kind of a member in a type's directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Plain data member
    Field {
        /// Has a getter
        readable: bool,
        /// Has a setter
        writable: bool,
    },
    /// Accessor-backed member
    Property {
        /// Has a getter
        readable: bool,
        /// Has a setter
        writable: bool,
    },
    /// Callable member
    Method {
        /// Number of declared overloads
        overloads: usize,
    },
    /// Constructor set, exposed as `new`
    Constructor {
        /// Number of declared overloads
        overloads: usize,
    },
}

#[derive(Clone)]
pub(crate) struct InstanceAccessor {
    pub(crate) ty: HostType,
    pub(crate) get: Option<Getter>,
    pub(crate) set: Option<Setter>,
}

impl InstanceAccessor {
    fn kind_flags(&self) -> (bool, bool) {
        (self.get.is_some(), self.set.is_some())
    }
}

#[derive(Clone)]
pub(crate) struct StaticAccessor {
    pub(crate) ty: HostType,
    pub(crate) get: Option<StaticGetter>,
    pub(crate) set: Option<StaticSetter>,
}

#[derive(Clone)]
pub(crate) struct InstanceMethod {
    pub(crate) signature: Signature,
    pub(crate) invoke: InstanceInvoke,
}

#[derive(Clone)]
pub(crate) struct StaticMethod {
    pub(crate) signature: Signature,
    pub(crate) invoke: StaticInvoke,
}

#[derive(Clone)]
pub(crate) struct Constructor {
    pub(crate) params: Vec<HostType>,
    pub(crate) invoke: ConstructInvoke,
}

#[derive(Clone)]
pub(crate) struct DictionaryOps {
    pub(crate) get: Rc<dyn Fn(&dyn Any, &str) -> BridgeResult<Option<HostValue>>>,
    pub(crate) set: Rc<dyn Fn(&mut dyn Any, &str, HostValue) -> BridgeResult<()>>,
    pub(crate) contains: Rc<dyn Fn(&dyn Any, &str) -> bool>,
}

// ============================================================================
// TypeDescriptor
// ============================================================================

/// Member directory of a forwarded host type
pub struct TypeDescriptor {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) tag: u32,
    pub(crate) fields: FxHashMap<String, InstanceAccessor>,
    pub(crate) properties: FxHashMap<String, InstanceAccessor>,
    pub(crate) methods: FxHashMap<String, Vec<InstanceMethod>>,
    pub(crate) static_fields: FxHashMap<String, StaticAccessor>,
    pub(crate) static_properties: FxHashMap<String, StaticAccessor>,
    pub(crate) static_methods: FxHashMap<String, Vec<StaticMethod>>,
    pub(crate) constructors: Vec<Constructor>,
    pub(crate) dictionary: Option<DictionaryOps>,
}

impl TypeDescriptor {
    /// Script-visible type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle tag assigned at registration ([`UNTYPED_TAG`] before that)
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Rust type this descriptor belongs to
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether instances answer member access from their entries first
    pub fn is_dictionary(&self) -> bool {
        self.dictionary.is_some()
    }

    /// Look up an instance member
    pub fn member(&self, name: &str) -> Option<MemberKind> {
        if let Some(field) = self.fields.get(name) {
            let (readable, writable) = field.kind_flags();
            return Some(MemberKind::Field { readable, writable });
        }
        if let Some(property) = self.properties.get(name) {
            let (readable, writable) = property.kind_flags();
            return Some(MemberKind::Property { readable, writable });
        }
        self.methods.get(name).map(|overloads| MemberKind::Method {
            overloads: overloads.len(),
        })
    }

    /// Look up a static member
    pub fn static_member(&self, name: &str) -> Option<MemberKind> {
        if name == "new" && !self.constructors.is_empty() {
            return Some(MemberKind::Constructor {
                overloads: self.constructors.len(),
            });
        }
        if let Some(field) = self.static_fields.get(name) {
            return Some(MemberKind::Field {
                readable: field.get.is_some(),
                writable: field.set.is_some(),
            });
        }
        if let Some(property) = self.static_properties.get(name) {
            return Some(MemberKind::Property {
                readable: property.get.is_some(),
                writable: property.set.is_some(),
            });
        }
        self.static_methods.get(name).map(|overloads| MemberKind::Method {
            overloads: overloads.len(),
        })
    }

    pub(crate) fn method_overloads(&self, name: &str) -> Option<&[InstanceMethod]> {
        self.methods.get(name).map(Vec::as_slice)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.fields.keys().collect();
        fields.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("fields", &fields)
            .field("methods", &methods)
            .field("constructors", &self.constructors.len())
            .field("dictionary", &self.is_dictionary())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TypeBuilder
// ============================================================================

fn downcast_ref<T: Any>(any: &dyn Any) -> BridgeResult<&T> {
    any.downcast_ref::<T>()
        .ok_or_else(|| BridgeError::mismatch(std::any::type_name::<T>(), "foreign object"))
}

fn downcast_mut<T: Any>(any: &mut dyn Any) -> BridgeResult<&mut T> {
    any.downcast_mut::<T>()
        .ok_or_else(|| BridgeError::mismatch(std::any::type_name::<T>(), "foreign object"))
}

fn getter<T: Any, R: IntoHost>(get: impl Fn(&T) -> R + 'static) -> Getter {
    Rc::new(move |any: &dyn Any| -> BridgeResult<HostValue> {
        Ok(get(downcast_ref::<T>(any)?).into_host())
    })
}

fn setter<T: Any, V: FromHost>(set: impl Fn(&mut T, V) + 'static) -> Setter {
    Rc::new(move |any: &mut dyn Any, value: HostValue| -> BridgeResult<()> {
        let value = V::from_host(&value)?;
        set(downcast_mut::<T>(any)?, value);
        Ok(())
    })
}

fn static_getter<R: IntoHost>(get: impl Fn() -> R + 'static) -> StaticGetter {
    Rc::new(move || get().into_host())
}

fn static_setter<V: FromHost>(set: impl Fn(V) + 'static) -> StaticSetter {
    Rc::new(move |value: HostValue| -> BridgeResult<()> {
        set(V::from_host(&value)?);
        Ok(())
    })
}

fn instance_invoke<F>(f: F) -> InstanceInvoke
where
    F: Fn(&mut CallContext<'_>, &HostObject, &[HostValue]) -> BridgeResult<HostValue> + 'static,
{
    Rc::new(f)
}

fn static_invoke<F>(f: F) -> StaticInvoke
where
    F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<HostValue> + 'static,
{
    Rc::new(f)
}

fn construct_invoke<F>(f: F) -> ConstructInvoke
where
    F: Fn(&mut CallContext<'_>, &Rc<TypeDescriptor>, &[HostValue]) -> BridgeResult<HostObject>
        + 'static,
{
    Rc::new(f)
}

/// Builder for the member directory of host type `T`
pub struct TypeBuilder<T: Any> {
    descriptor: TypeDescriptor,
    default_constructor: Option<Constructor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> TypeBuilder<T> {
    /// Start describing `T` under the script-visible `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: TypeDescriptor {
                name: name.into(),
                type_id: TypeId::of::<T>(),
                tag: UNTYPED_TAG,
                fields: FxHashMap::default(),
                properties: FxHashMap::default(),
                methods: FxHashMap::default(),
                static_fields: FxHashMap::default(),
                static_properties: FxHashMap::default(),
                static_methods: FxHashMap::default(),
                constructors: Vec::new(),
                dictionary: None,
            },
            default_constructor: None,
            _marker: PhantomData,
        }
    }

    // ------------------------------------------------------------------------
    // Instance members
    // ------------------------------------------------------------------------

    /// Read-write field
    pub fn field<R, V>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> R + 'static,
        set: impl Fn(&mut T, V) + 'static,
    ) -> Self
    where
        R: IntoHost,
        V: FromHost,
    {
        self.descriptor.fields.insert(
            name.to_string(),
            InstanceAccessor {
                ty: V::host_type(),
                get: Some(getter(get)),
                set: Some(setter(set)),
            },
        );
        self
    }

    /// Field without a setter; script writes fail
    pub fn readonly_field<R: IntoHost>(mut self, name: &str, get: impl Fn(&T) -> R + 'static) -> Self {
        self.descriptor.fields.insert(
            name.to_string(),
            InstanceAccessor {
                ty: HostType::Any,
                get: Some(getter(get)),
                set: None,
            },
        );
        self
    }

    /// Read-write property
    pub fn property<R, V>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> R + 'static,
        set: impl Fn(&mut T, V) + 'static,
    ) -> Self
    where
        R: IntoHost,
        V: FromHost,
    {
        self.descriptor.properties.insert(
            name.to_string(),
            InstanceAccessor {
                ty: V::host_type(),
                get: Some(getter(get)),
                set: Some(setter(set)),
            },
        );
        self
    }

    /// Property with only a getter
    pub fn readonly_property<R: IntoHost>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> R + 'static,
    ) -> Self {
        self.descriptor.properties.insert(
            name.to_string(),
            InstanceAccessor {
                ty: HostType::Any,
                get: Some(getter(get)),
                set: None,
            },
        );
        self
    }

    /// Property with only a setter; script reads fall through to methods
    pub fn writeonly_property<V: FromHost>(
        mut self,
        name: &str,
        set: impl Fn(&mut T, V) + 'static,
    ) -> Self {
        self.descriptor.properties.insert(
            name.to_string(),
            InstanceAccessor {
                ty: V::host_type(),
                get: None,
                set: Some(setter(set)),
            },
        );
        self
    }

    /// Method overload returning a value. Calling this again with the same
    /// name adds another overload.
    ///
    /// The receiver stays mutably borrowed while `f` runs, so script code
    /// reached from `f` cannot touch the same object. Use
    /// [`reentrant_method`](Self::reentrant_method) for that.
    pub fn method<R, F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        R: IntoHost,
        F: Fn(&mut CallContext<'_>, &mut T, &[HostValue]) -> BridgeResult<R> + 'static,
    {
        let invoke = instance_invoke(move |cx, obj, args| {
            let mut this = obj.borrow_mut::<T>()?;
            f(cx, &mut this, args).map(IntoHost::into_host)
        });
        self.push_method(name, Signature::new(params, true), invoke);
        self
    }

    /// Method overload returning nothing
    pub fn action<F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &mut T, &[HostValue]) -> BridgeResult<()> + 'static,
    {
        let invoke = instance_invoke(move |cx, obj, args| {
            let mut this = obj.borrow_mut::<T>()?;
            f(cx, &mut this, args).map(|()| HostValue::Nil)
        });
        self.push_method(name, Signature::new(params, false), invoke);
        self
    }

    /// Method overload that receives the object itself instead of a borrow.
    ///
    /// `f` borrows the receiver only around its own field access, so it may
    /// call script functions that read or call back into the same object,
    /// or take the receiver as one of its own arguments.
    pub fn reentrant_method<R, F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        R: IntoHost,
        F: Fn(&mut CallContext<'_>, &HostObject, &[HostValue]) -> BridgeResult<R> + 'static,
    {
        let invoke = instance_invoke(move |cx, obj, args| {
            f(cx, obj, args).map(IntoHost::into_host)
        });
        self.push_method(name, Signature::new(params, true), invoke);
        self
    }

    /// Reentrant overload returning nothing
    pub fn reentrant_action<F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &HostObject, &[HostValue]) -> BridgeResult<()> + 'static,
    {
        let invoke =
            instance_invoke(move |cx, obj, args| f(cx, obj, args).map(|()| HostValue::Nil));
        self.push_method(name, Signature::new(params, false), invoke);
        self
    }

    fn push_method(&mut self, name: &str, signature: Signature, invoke: InstanceInvoke) {
        self.descriptor
            .methods
            .entry(name.to_string())
            .or_default()
            .push(InstanceMethod { signature, invoke });
    }

    /// Make instances dictionary-like: member access consults entries first
    pub fn dictionary(mut self) -> Self
    where
        T: HostDictionary,
    {
        self.descriptor.dictionary = Some(DictionaryOps {
            get: Rc::new(|any: &dyn Any, key: &str| -> BridgeResult<Option<HostValue>> {
                Ok(downcast_ref::<T>(any)?.get_entry(key))
            }),
            set: Rc::new(
                |any: &mut dyn Any, key: &str, value: HostValue| -> BridgeResult<()> {
                    downcast_mut::<T>(any)?.set_entry(key, value)
                },
            ),
            contains: Rc::new(|any: &dyn Any, key: &str| -> bool {
                any.downcast_ref::<T>()
                    .map_or(false, |dict| dict.contains_entry(key))
            }),
        });
        self
    }

    // ------------------------------------------------------------------------
    // Static members
    // ------------------------------------------------------------------------

    /// Read-write static field
    pub fn static_field<R, V>(
        mut self,
        name: &str,
        get: impl Fn() -> R + 'static,
        set: impl Fn(V) + 'static,
    ) -> Self
    where
        R: IntoHost,
        V: FromHost,
    {
        self.descriptor.static_fields.insert(
            name.to_string(),
            StaticAccessor {
                ty: V::host_type(),
                get: Some(static_getter(get)),
                set: Some(static_setter(set)),
            },
        );
        self
    }

    /// Static field without a setter
    pub fn readonly_static_field<R: IntoHost>(
        mut self,
        name: &str,
        get: impl Fn() -> R + 'static,
    ) -> Self {
        self.descriptor.static_fields.insert(
            name.to_string(),
            StaticAccessor {
                ty: HostType::Any,
                get: Some(static_getter(get)),
                set: None,
            },
        );
        self
    }

    /// Read-write static property
    pub fn static_property<R, V>(
        mut self,
        name: &str,
        get: impl Fn() -> R + 'static,
        set: impl Fn(V) + 'static,
    ) -> Self
    where
        R: IntoHost,
        V: FromHost,
    {
        self.descriptor.static_properties.insert(
            name.to_string(),
            StaticAccessor {
                ty: V::host_type(),
                get: Some(static_getter(get)),
                set: Some(static_setter(set)),
            },
        );
        self
    }

    /// Static property without a setter
    pub fn readonly_static_property<R: IntoHost>(
        mut self,
        name: &str,
        get: impl Fn() -> R + 'static,
    ) -> Self {
        self.descriptor.static_properties.insert(
            name.to_string(),
            StaticAccessor {
                ty: HostType::Any,
                get: Some(static_getter(get)),
                set: None,
            },
        );
        self
    }

    /// Compile-time constant, exposed as a read-only static field
    pub fn constant(self, name: &str, value: impl IntoHost) -> Self {
        let value = value.into_host();
        self.readonly_static_field(name, move || value.clone())
    }

    /// Enumeration member, exposed as a read-only integer constant
    pub fn enum_value(self, name: &str, value: i64) -> Self {
        self.constant(name, value)
    }

    /// Static method overload returning a value
    pub fn static_method<R, F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        R: IntoHost,
        F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<R> + 'static,
    {
        let invoke = static_invoke(move |cx, args| f(cx, args).map(IntoHost::into_host));
        self.push_static_method(name, Signature::new(params, true), invoke);
        self
    }

    /// Static method overload returning nothing
    pub fn static_action<F>(mut self, name: &str, params: &[HostType], f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<()> + 'static,
    {
        let invoke = static_invoke(move |cx, args| f(cx, args).map(|()| HostValue::Nil));
        self.push_static_method(name, Signature::new(params, false), invoke);
        self
    }

    fn push_static_method(&mut self, name: &str, signature: Signature, invoke: StaticInvoke) {
        self.descriptor
            .static_methods
            .entry(name.to_string())
            .or_default()
            .push(StaticMethod { signature, invoke });
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Constructor overload, reachable from scripts as `Type.new(...)`
    pub fn constructor<F>(mut self, params: &[HostType], f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[HostValue]) -> BridgeResult<T> + 'static,
    {
        self.descriptor.constructors.push(Constructor {
            params: params.to_vec(),
            invoke: construct_invoke(move |cx, descriptor, args| {
                Ok(HostObject::new(f(cx, args)?, descriptor.clone()))
            }),
        });
        self
    }

    /// Zero-argument construction through `Default`, used only when no
    /// explicit constructor is declared
    pub fn default_constructor(mut self) -> Self
    where
        T: Default,
    {
        self.default_constructor = Some(Constructor {
            params: Vec::new(),
            invoke: construct_invoke(|_cx, descriptor, _args| {
                Ok(HostObject::new(T::default(), descriptor.clone()))
            }),
        });
        self
    }

    /// Finish the directory
    pub fn build(mut self) -> TypeDescriptor {
        if self.descriptor.constructors.is_empty() {
            if let Some(default) = self.default_constructor.take() {
                self.descriptor.constructors.push(default);
            }
        }
        self.descriptor
    }
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// Forwarded types of one session, keyed by Rust type
#[derive(Debug)]
pub struct TypeRegistry {
    types: FxHashMap<TypeId, Rc<TypeDescriptor>>,
    next_tag: u32,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            types: FxHashMap::default(),
            next_tag: UNTYPED_TAG + 1,
        }
    }

    /// Register a descriptor, assigning it a fresh handle tag. A descriptor
    /// for the same Rust type is replaced.
    pub fn register(&mut self, mut descriptor: TypeDescriptor) -> Rc<TypeDescriptor> {
        descriptor.tag = self.next_tag;
        self.next_tag += 1;
        let descriptor = Rc::new(descriptor);
        if let Some(old) = self
            .types
            .insert(descriptor.type_id, Rc::clone(&descriptor))
        {
            log::debug!(
                "Replaced descriptor for {} (tag {} -> {})",
                old.name,
                old.tag,
                descriptor.tag
            );
        }
        descriptor
    }

    /// Descriptor registered for `type_id`
    pub fn get(&self, type_id: TypeId) -> Option<Rc<TypeDescriptor>> {
        self.types.get(&type_id).cloned()
    }

    /// Descriptor registered for `T`
    pub fn lookup<T: Any>(&self) -> Option<Rc<TypeDescriptor>> {
        self.get(TypeId::of::<T>())
    }

    /// Descriptor registered under a script-visible name
    pub fn find(&self, name: &str) -> Option<Rc<TypeDescriptor>> {
        self.types.values().find(|d| d.name == name).cloned()
    }

    /// Check if `type_id` is registered
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no type is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
