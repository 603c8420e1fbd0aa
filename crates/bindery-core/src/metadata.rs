#![forbid(unsafe_code)]

//! Declaration-time metadata for bindable object types.
//!
//! Each declared type owns one effective [`FieldMap`]: the field map of its
//! nearest ancestor overlaid with its own declarations. The map is built
//! lazily on first access by copying the parent's map, then mutated in place
//! by later declarations on the same type.
//!
//! # Invariants
//!
//! 1. Within one effective map each field name maps to exactly one
//!    descriptor of exactly one kind.
//! 2. Redeclaring a name on a subtype overrides the inherited descriptor
//!    without touching the parent's map.
//! 3. Descriptors are immutable once declared (`Rc`-shared, never mutated).
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Empty field name | [`MetadataError::InvalidFieldName`] |
//! | Declaring on an undefined type | [`MetadataError::UnknownType`] |
//! | Defining a type twice | [`MetadataError::DuplicateType`] |

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::error::{ActionError, MetadataError};
use crate::event::BindableEvent;
use crate::messaging::EventEmitted;
use crate::object::ObjectRef;
use crate::registry::{TypeIdentity, TypeRegistration};
use crate::runtime::Runtime;
use crate::value::{TypeToken, Value};

/// Name of the root bindable type every declared type descends from.
pub const ROOT_TYPE: &str = "BindableObject";

/// Editor-facing descriptive metadata shared by every field kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInfo {
    pub desc: String,
    pub details: Option<String>,
    pub tag: Option<String>,
    pub sub_tag: Option<String>,
}

impl FieldInfo {
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn sub_tag(mut self, sub_tag: impl Into<String>) -> Self {
        self.sub_tag = Some(sub_tag.into());
        self
    }
}

/// The three kinds of declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Property,
    Event,
    Action,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "prop",
            Self::Event => "event",
            Self::Action => "action",
        })
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Produces a fresh default each time a property is reset.
pub type DefaultFactory = Rc<dyn Fn(&Rc<Runtime>) -> Value>;

/// A declared default: a fixed value or a factory re-invoked on every reset.
#[derive(Clone)]
pub enum PropertyDefault {
    Value(Value),
    Factory(DefaultFactory),
}

impl fmt::Debug for PropertyDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Metadata of one declared property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub key: String,
    pub ty: TypeToken,
    pub default: PropertyDefault,
    /// Editors should offer a two-way binding for this property.
    pub prefer_bidirectional: bool,
    /// The property holds a template fragment.
    pub templated: bool,
    pub info: FieldInfo,
}

impl PropertyDescriptor {
    pub fn new(key: impl Into<String>, ty: TypeToken) -> Self {
        Self {
            key: key.into(),
            ty,
            default: PropertyDefault::Value(Value::Null),
            prefer_bidirectional: false,
            templated: false,
            info: FieldInfo::default(),
        }
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = PropertyDefault::Value(value.into());
        self
    }

    /// Object-valued defaults must use a factory so instances never share one.
    #[must_use]
    pub fn default_factory(mut self, factory: impl Fn(&Rc<Runtime>) -> Value + 'static) -> Self {
        self.default = PropertyDefault::Factory(Rc::new(factory));
        self
    }

    #[must_use]
    pub fn prefer_bidirectional(mut self) -> Self {
        self.prefer_bidirectional = true;
        self
    }

    #[must_use]
    pub fn templated(mut self) -> Self {
        self.templated = true;
        self
    }

    #[must_use]
    pub fn info(mut self, info: FieldInfo) -> Self {
        self.info = info;
        self
    }

    /// Evaluate the declared default. Factories run on every call.
    #[must_use]
    pub fn make_default(&self, runtime: &Rc<Runtime>) -> Value {
        match &self.default {
            PropertyDefault::Value(v) => v.clone(),
            PropertyDefault::Factory(f) => f(runtime),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Builds the event instance for one object at construction time.
pub type EventFactory = Rc<dyn Fn(&ObjectRef, &str) -> BindableEvent>;

/// Metadata of one declared event.
#[derive(Clone)]
pub struct EventDescriptor {
    pub key: String,
    pub ty: TypeToken,
    pub factory: EventFactory,
    pub info: FieldInfo,
}

impl EventDescriptor {
    /// An event producing plain [`BindableEvent`] instances.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ty: TypeToken::Event(crate::event::EVENT_TAG.to_owned()),
            factory: Rc::new(|owner: &ObjectRef, name: &str| BindableEvent::new(owner, name)),
            info: FieldInfo::default(),
        }
    }

    /// Use a custom factory, typically producing a tagged event subtype.
    #[must_use]
    pub fn factory(
        mut self,
        ty: TypeToken,
        factory: impl Fn(&ObjectRef, &str) -> BindableEvent + 'static,
    ) -> Self {
        self.ty = ty;
        self.factory = Rc::new(factory);
        self
    }

    #[must_use]
    pub fn info(mut self, info: FieldInfo) -> Self {
        self.info = info;
        self
    }
}

impl fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("key", &self.key)
            .field("ty", &self.ty)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Future returned by an action handler.
pub type ActionFuture = LocalBoxFuture<'static, Result<(), ActionError>>;

/// Invokes an action on its object with the triggering event's arguments.
pub type ActionHandler = Rc<dyn Fn(ObjectRef, EventEmitted) -> ActionFuture>;

/// Metadata of one declared action.
#[derive(Clone)]
pub struct ActionDescriptor {
    pub key: String,
    pub param_types: Vec<TypeToken>,
    pub return_type: TypeToken,
    pub handler: ActionHandler,
    pub info: FieldInfo,
}

impl ActionDescriptor {
    /// A synchronous action.
    pub fn new(
        key: impl Into<String>,
        handler: impl Fn(&ObjectRef, &EventEmitted) -> Result<(), ActionError> + 'static,
    ) -> Self {
        let handler = Rc::new(handler);
        Self::from_handler(
            key,
            Rc::new(move |obj: ObjectRef, args: EventEmitted| {
                let handler = Rc::clone(&handler);
                async move { handler(&obj, &args) }.boxed_local()
            }),
        )
    }

    /// An asynchronous action.
    pub fn new_async<F, Fut>(key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ObjectRef, EventEmitted) -> Fut + 'static,
        Fut: Future<Output = Result<(), ActionError>> + 'static,
    {
        Self::from_handler(
            key,
            Rc::new(move |obj: ObjectRef, args: EventEmitted| handler(obj, args).boxed_local()),
        )
    }

    fn from_handler(key: impl Into<String>, handler: ActionHandler) -> Self {
        Self {
            key: key.into(),
            param_types: vec![TypeToken::Event(crate::event::EVENT_TAG.to_owned())],
            return_type: TypeToken::Any,
            handler,
            info: FieldInfo::default(),
        }
    }

    #[must_use]
    pub fn signature(mut self, params: Vec<TypeToken>, returns: TypeToken) -> Self {
        self.param_types = params;
        self.return_type = returns;
        self
    }

    #[must_use]
    pub fn info(mut self, info: FieldInfo) -> Self {
        self.info = info;
        self
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("key", &self.key)
            .field("param_types", &self.param_types)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FieldDescriptor / FieldMap
// ---------------------------------------------------------------------------

/// One entry of a type's effective field map.
#[derive(Debug, Clone)]
pub enum FieldDescriptor {
    Property(Rc<PropertyDescriptor>),
    Event(Rc<EventDescriptor>),
    Action(Rc<ActionDescriptor>),
}

impl FieldDescriptor {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Property(p) => &p.key,
            Self::Event(e) => &e.key,
            Self::Action(a) => &a.key,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Property(_) => FieldKind::Property,
            Self::Event(_) => FieldKind::Event,
            Self::Action(_) => FieldKind::Action,
        }
    }

    #[must_use]
    pub fn ty(&self) -> TypeToken {
        match self {
            Self::Property(p) => p.ty.clone(),
            Self::Event(e) => e.ty.clone(),
            Self::Action(_) => TypeToken::Any,
        }
    }

    #[must_use]
    pub fn info(&self) -> &FieldInfo {
        match self {
            Self::Property(p) => &p.info,
            Self::Event(e) => &e.info,
            Self::Action(a) => &a.info,
        }
    }

    #[must_use]
    pub fn as_property(&self) -> Option<&Rc<PropertyDescriptor>> {
        match self {
            Self::Property(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_event(&self) -> Option<&Rc<EventDescriptor>> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_action(&self) -> Option<&Rc<ActionDescriptor>> {
        match self {
            Self::Action(a) => Some(a),
            _ => None,
        }
    }
}

impl From<PropertyDescriptor> for FieldDescriptor {
    fn from(p: PropertyDescriptor) -> Self {
        Self::Property(Rc::new(p))
    }
}

impl From<EventDescriptor> for FieldDescriptor {
    fn from(e: EventDescriptor) -> Self {
        Self::Event(Rc::new(e))
    }
}

impl From<ActionDescriptor> for FieldDescriptor {
    fn from(a: ActionDescriptor) -> Self {
        Self::Action(Rc::new(a))
    }
}

/// Effective field map of one type, sorted by field name.
pub type FieldMap = BTreeMap<String, FieldDescriptor>;

// ---------------------------------------------------------------------------
// MetadataStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TypeEntry {
    parent: Option<String>,
    is_abstract: bool,
    /// Materialized effective map; `None` until first access.
    fields: Option<Rc<FieldMap>>,
}

/// Per-type, inheritance-aware descriptor table.
#[derive(Debug, Default)]
pub struct MetadataStore {
    types: RefCell<BTreeMap<String, TypeEntry>>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a type. The parent, if any, must already exist.
    pub fn define_type(
        &self,
        name: &str,
        parent: Option<&str>,
        is_abstract: bool,
    ) -> Result<(), MetadataError> {
        let mut types = self.types.borrow_mut();
        if types.contains_key(name) {
            return Err(MetadataError::DuplicateType(name.to_owned()));
        }
        if let Some(p) = parent
            && !types.contains_key(p)
        {
            return Err(MetadataError::UnknownType(p.to_owned()));
        }
        types.insert(
            name.to_owned(),
            TypeEntry {
                parent: parent.map(str::to_owned),
                is_abstract,
                fields: None,
            },
        );
        Ok(())
    }

    /// Declare (or override) one field on a type.
    pub fn declare(
        &self,
        type_name: &str,
        descriptor: impl Into<FieldDescriptor>,
    ) -> Result<(), MetadataError> {
        let descriptor = descriptor.into();
        if descriptor.key().is_empty() {
            return Err(MetadataError::InvalidFieldName(
                descriptor.key().to_owned(),
                type_name.to_owned(),
            ));
        }
        // Materialize before taking the mutable borrow.
        self.get_field_map(type_name)?;
        let mut types = self.types.borrow_mut();
        let entry = types
            .get_mut(type_name)
            .ok_or_else(|| MetadataError::UnknownType(type_name.to_owned()))?;
        let map = entry.fields.get_or_insert_with(Rc::default);
        Rc::make_mut(map).insert(descriptor.key().to_owned(), descriptor);
        Ok(())
    }

    /// The effective, inheritance-merged field map of a type.
    ///
    /// On first access the map is created by copying the nearest ancestor's
    /// effective map and cached.
    pub fn get_field_map(&self, type_name: &str) -> Result<Rc<FieldMap>, MetadataError> {
        let parent = {
            let types = self.types.borrow();
            let entry = types
                .get(type_name)
                .ok_or_else(|| MetadataError::UnknownType(type_name.to_owned()))?;
            if let Some(fields) = &entry.fields {
                return Ok(Rc::clone(fields));
            }
            entry.parent.clone()
        };
        let inherited = match parent {
            Some(p) => (*self.get_field_map(&p)?).clone(),
            None => FieldMap::new(),
        };
        let map = Rc::new(inherited);
        if let Some(entry) = self.types.borrow_mut().get_mut(type_name) {
            entry.fields = Some(Rc::clone(&map));
        }
        Ok(map)
    }

    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.borrow().contains_key(type_name)
    }

    #[must_use]
    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.types
            .borrow()
            .get(type_name)
            .is_some_and(|e| e.is_abstract)
    }

    #[must_use]
    pub fn parent_of(&self, type_name: &str) -> Option<String> {
        self.types
            .borrow()
            .get(type_name)
            .and_then(|e| e.parent.clone())
    }

    /// Whether `type_name` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subtype(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name.to_owned());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.parent_of(&name);
        }
        false
    }

    /// Every defined type name, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        self.types.borrow().keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// TypeDeclaration builder
// ---------------------------------------------------------------------------

/// Builder that defines a bindable type and its fields in one pass.
///
/// ```ignore
/// TypeDeclaration::new("Label")
///     .property(PropertyDescriptor::new("text", TypeToken::String).default_value(""))
///     .event(EventDescriptor::new("click"))
///     .serializable()
///     .declare(&runtime)?;
/// ```
#[derive(Debug)]
pub struct TypeDeclaration {
    name: String,
    parent: String,
    is_abstract: bool,
    serializable: bool,
    fields: Vec<FieldDescriptor>,
}

impl TypeDeclaration {
    /// Start a declaration deriving directly from [`ROOT_TYPE`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ROOT_TYPE.to_owned(),
            is_abstract: false,
            serializable: false,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Register the type tag now instead of on first serialization.
    #[must_use]
    pub fn serializable(mut self) -> Self {
        self.serializable = true;
        self
    }

    #[must_use]
    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.fields.push(descriptor.into());
        self
    }

    #[must_use]
    pub fn event(mut self, descriptor: EventDescriptor) -> Self {
        self.fields.push(descriptor.into());
        self
    }

    #[must_use]
    pub fn action(mut self, descriptor: ActionDescriptor) -> Self {
        self.fields.push(descriptor.into());
        self
    }

    /// Define the type in the runtime's metadata store.
    pub fn declare(self, runtime: &Runtime) -> Result<(), crate::Error> {
        let store = runtime.metadata();
        store.define_type(&self.name, Some(&self.parent), self.is_abstract)?;
        for field in self.fields {
            store.declare(&self.name, field)?;
        }
        if self.serializable {
            runtime
                .types()
                .register(object_registration(self.name.clone()))?;
        }
        tracing::debug!(type_name = %self.name, parent = %self.parent, "type declared");
        Ok(())
    }
}

/// Registry entry for a declared bindable type; the tag is the type name.
pub(crate) fn object_registration(type_name: String) -> TypeRegistration {
    let tag = type_name.clone();
    let decode_as = type_name.clone();
    TypeRegistration::new(tag, TypeIdentity::Declared(type_name), move |de, json| {
        crate::serialize::hooks::deserialize_object(de, &decode_as, json)
    })
}
