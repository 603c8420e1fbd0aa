#![forbid(unsafe_code)]

//! Bindable objects: typed property slots with a three-state lifecycle.
//!
//! Every declared property of a [`BindableObject`] is in exactly one state:
//!
//! | State | Slot holds |
//! |-------|-----------|
//! | [`PropertyState::Default`] | the declared default |
//! | [`PropertyState::Local`] | the last value passed to `set` |
//! | [`PropertyState::Binding`] | the last value pushed by the binding |
//!
//! Writes go through one notification path: an unchanged *scalar* write is
//! suppressed; every other write publishes exactly one
//! [`PropertyChanged`] on the runtime bus before returning. Non-scalar
//! values always notify so observers of in-place mutated children still
//! hear about the write.
//!
//! # Invariants
//!
//! 1. A binding slot and the value slot of a property change together.
//! 2. A [`Binding`](crate::binding::Binding) feeds at most one property; `bind` fails before touching
//!    any state if the binding is already attached.
//! 3. No `RefCell` borrow of the object is held while the bus runs.
//! 4. Dropping an object detaches every binding it owns.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::binding::BindingRef;
use crate::error::{BindingError, ObjectError};
use crate::event::{BindableEvent, EventRef, Task};
use crate::messaging::PropertyChanged;
use crate::metadata::{
    ActionDescriptor, EventDescriptor, FieldDescriptor, FieldMap, PropertyDescriptor,
};
use crate::runtime::Runtime;
use crate::value::Value;

/// Shared handle to a live object.
pub type ObjectRef = Rc<BindableObject>;

/// Process-unique id counter; the first object gets id 1.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Globally unique opaque key used for cross-object lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// A fresh random (v4 UUID) key.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<ObjectKey> for Value {
    fn from(key: ObjectKey) -> Self {
        Value::String(key.0)
    }
}

/// Current state of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyState {
    Default,
    Local,
    Binding,
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Local => "local",
            Self::Binding => "binding",
        })
    }
}

/// One entry of an object's bindings record.
#[derive(Clone)]
pub enum BindingSlot {
    /// The property uses its declared default.
    Default,
    /// The property holds a local value.
    Local,
    /// The property is driven by a binding.
    Bound(BindingRef),
}

impl BindingSlot {
    #[must_use]
    pub fn state(&self) -> PropertyState {
        match self {
            Self::Default => PropertyState::Default,
            Self::Local => PropertyState::Local,
            Self::Bound(_) => PropertyState::Binding,
        }
    }
}

impl fmt::Debug for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Local => f.write_str("Local"),
            Self::Bound(b) => f.debug_tuple("Bound").field(&b.kind()).finish(),
        }
    }
}

/// Property → slot map restored first when an object deserializes.
pub type BindingsRecord = BTreeMap<String, BindingSlot>;

/// A property descriptor paired with the property's current state.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub descriptor: Rc<PropertyDescriptor>,
    pub state: PropertyState,
}

/// Metadata view of one object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub type_name: String,
    pub properties: BTreeMap<String, PropertyInfo>,
    pub events: BTreeMap<String, Rc<EventDescriptor>>,
    pub actions: BTreeMap<String, Rc<ActionDescriptor>>,
}

/// An instance of a declared type.
pub struct BindableObject {
    this: Weak<BindableObject>,
    runtime: Rc<Runtime>,
    type_name: String,
    fields: Rc<FieldMap>,
    values: RefCell<BTreeMap<String, Value>>,
    bindings: RefCell<BindingsRecord>,
    events: RefCell<BTreeMap<String, EventRef>>,
}

impl BindableObject {
    /// Construct an instance with every property at its default, one event
    /// per declared event, a fresh id and a fresh key.
    pub fn new(runtime: &Rc<Runtime>, type_name: &str) -> Result<ObjectRef, ObjectError> {
        let metadata = runtime.metadata();
        let fields = metadata
            .get_field_map(type_name)
            .map_err(|_| ObjectError::UnknownType(type_name.to_owned()))?;
        if metadata.is_abstract(type_name) {
            return Err(ObjectError::AbstractType(type_name.to_owned()));
        }

        let mut values = BTreeMap::new();
        let mut bindings = BindingsRecord::new();
        for (key, field) in fields.iter() {
            if let Some(prop) = field.as_property() {
                values.insert(key.clone(), prop.make_default(runtime));
                bindings.insert(key.clone(), BindingSlot::Default);
            }
        }

        let object = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime: Rc::clone(runtime),
            type_name: type_name.to_owned(),
            fields,
            values: RefCell::new(values),
            bindings: RefCell::new(bindings),
            events: RefCell::new(BTreeMap::new()),
        });

        let events = object
            .fields
            .iter()
            .filter_map(|(key, field)| {
                field.as_event().map(|e| {
                    let event = (e.factory)(&object, key).adopt(&object, key);
                    (key.clone(), Rc::new(event))
                })
            })
            .collect();
        *object.events.borrow_mut() = events;

        object.set("id", next_id())?;
        object.set("key", ObjectKey::generate())?;
        tracing::trace!(type_name, id = object.id(), "object created");
        Ok(object)
    }

    #[must_use]
    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Numeric id; `0` if the `id` property holds no number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.values
            .borrow()
            .get("id")
            .and_then(Value::as_f64)
            .map_or(0, |n| n as u64)
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.values
            .borrow()
            .get("key")
            .map(|v| ObjectKey::new(v.to_display_string()))
            .unwrap_or_else(|| ObjectKey::new(""))
    }

    /// The `Type#id` label used in logs and attachment owners.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}#{}", self.type_name, self.id())
    }

    /// A strong handle to this object.
    #[must_use]
    pub fn handle(&self) -> Option<ObjectRef> {
        self.this.upgrade()
    }

    #[must_use]
    pub fn fields(&self) -> &Rc<FieldMap> {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Rc<PropertyDescriptor>> {
        self.fields.get(key).and_then(FieldDescriptor::as_property)
    }

    fn require_property(&self, key: &str) -> Result<Rc<PropertyDescriptor>, ObjectError> {
        self.property(key)
            .cloned()
            .ok_or_else(|| ObjectError::UnknownProperty {
                type_name: self.type_name.clone(),
                key: key.to_owned(),
            })
    }

    /// Current value of a declared property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    /// State of a declared property; `None` for undeclared names.
    #[must_use]
    pub fn state(&self, key: &str) -> Option<PropertyState> {
        self.bindings.borrow().get(key).map(BindingSlot::state)
    }

    /// The binding driving `key`, if any.
    #[must_use]
    pub fn binding(&self, key: &str) -> Option<BindingRef> {
        match self.bindings.borrow().get(key) {
            Some(BindingSlot::Bound(b)) => Some(Rc::clone(b)),
            _ => None,
        }
    }

    /// Snapshot of the bindings record.
    #[must_use]
    pub fn bindings(&self) -> BindingsRecord {
        self.bindings.borrow().clone()
    }

    /// Snapshot of every property value.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.values.borrow().clone()
    }

    /// Write `value` and publish a change unless it is an unchanged scalar.
    ///
    /// Returns whether a notification was published.
    pub(crate) fn change_property(&self, key: &str, value: Value, force: bool) -> bool {
        if !force {
            let values = self.values.borrow();
            if let Some(old) = values.get(key)
                && value.is_scalar()
                && *old == value
            {
                return false;
            }
        }
        self.values
            .borrow_mut()
            .insert(key.to_owned(), value.clone());
        if let Some(sender) = self.this.upgrade() {
            self.runtime.bus().property_changed().emit(&PropertyChanged {
                sender,
                property: key.to_owned(),
                value,
            });
        }
        true
    }

    /// Republish the current value of `key`, e.g. after mutating a child.
    pub fn notify(&self, key: &str) -> Result<(), ObjectError> {
        self.require_property(key)?;
        let value = self.get(key).unwrap_or_default();
        self.change_property(key, value, true);
        Ok(())
    }

    /// Replace the slot of `key`, detaching the binding it held.
    fn set_binding(&self, key: &str, slot: BindingSlot) {
        let previous = self.bindings.borrow_mut().insert(key.to_owned(), slot);
        if let Some(BindingSlot::Bound(old)) = previous {
            old.detach();
        }
    }

    /// Reset `key` to its declared default. Factories run again.
    pub fn unset(&self, key: &str) -> Result<(), ObjectError> {
        let prop = self.require_property(key)?;
        self.set_binding(key, BindingSlot::Default);
        self.change_property(key, prop.make_default(&self.runtime), false);
        Ok(())
    }

    /// Give `key` a local value.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ObjectError> {
        self.require_property(key)?;
        self.set_binding(key, BindingSlot::Local);
        self.change_property(key, value.into(), false);
        Ok(())
    }

    /// Drive `key` from `binding`, seeding it immediately.
    pub fn bind(&self, key: &str, binding: &BindingRef) -> Result<(), ObjectError> {
        if let Some(owner) = binding.owner() {
            return Err(BindingError::AlreadyAttached { owner }.into());
        }
        let prop = self.require_property(key)?;
        self.set_binding(key, BindingSlot::Bound(Rc::clone(binding)));

        let target = self.this.clone();
        let property = key.to_owned();
        binding.attach(
            format!("{}.{key}", self.label()),
            Rc::new(move |value| {
                if let Some(object) = target.upgrade() {
                    object.change_property(&property, value, false);
                }
            }),
        )?;
        binding.set_target_type(Some(prop.ty.clone()));
        let seeded = binding.exec();
        tracing::trace!(object = %self.label(), key, seeded, "property bound");
        Ok(())
    }

    /// Write from a two-way control.
    ///
    /// Behaves like [`set`](Self::set) unless `key` is driven by a
    /// bidirectional binding; then the property is updated first and the
    /// source only if the value actually changed.
    pub fn update(&self, key: &str, value: impl Into<Value>) -> Result<(), ObjectError> {
        let value = value.into();
        match self.binding(key) {
            Some(binding) if binding.as_bidirectional().is_some() => {
                self.require_property(key)?;
                if self.change_property(key, value.clone(), false)
                    && let Some(two_way) = binding.as_bidirectional()
                {
                    two_way.update_source(&value);
                }
                Ok(())
            }
            _ => self.set(key, value),
        }
    }

    /// Metadata view with the current state of every property.
    #[must_use]
    pub fn info(&self) -> ObjectInfo {
        let bindings = self.bindings.borrow();
        let mut info = ObjectInfo {
            type_name: self.type_name.clone(),
            properties: BTreeMap::new(),
            events: BTreeMap::new(),
            actions: BTreeMap::new(),
        };
        for (key, field) in self.fields.iter() {
            match field {
                FieldDescriptor::Property(p) => {
                    let state = bindings
                        .get(key)
                        .map_or(PropertyState::Default, BindingSlot::state);
                    info.properties.insert(
                        key.clone(),
                        PropertyInfo {
                            descriptor: Rc::clone(p),
                            state,
                        },
                    );
                }
                FieldDescriptor::Event(e) => {
                    info.events.insert(key.clone(), Rc::clone(e));
                }
                FieldDescriptor::Action(a) => {
                    info.actions.insert(key.clone(), Rc::clone(a));
                }
            }
        }
        info
    }

    #[must_use]
    pub fn event(&self, name: &str) -> Option<EventRef> {
        self.events.borrow().get(name).cloned()
    }

    /// Every event instance, sorted by name.
    #[must_use]
    pub fn events(&self) -> Vec<(String, EventRef)> {
        self.events
            .borrow()
            .iter()
            .map(|(k, e)| (k.clone(), Rc::clone(e)))
            .collect()
    }

    /// Replace the tasks of event `name` with a fresh immutable event.
    pub fn set_event_tasks(&self, name: &str, tasks: Vec<Task>) -> Result<(), ObjectError> {
        let current = self.event(name).ok_or_else(|| ObjectError::UnknownEvent {
            type_name: self.type_name.clone(),
            key: name.to_owned(),
        })?;
        self.install_event(name, current.with_tasks(tasks));
        Ok(())
    }

    pub(crate) fn install_event(&self, name: &str, event: BindableEvent) {
        let event = match self.this.upgrade() {
            Some(owner) => event.adopt(&owner, name),
            None => event,
        };
        self.events
            .borrow_mut()
            .insert(name.to_owned(), Rc::new(event));
    }

    /// Install a deserialized bindings record without attaching anything.
    pub(crate) fn replace_bindings(&self, record: BindingsRecord) {
        let old = std::mem::replace(&mut *self.bindings.borrow_mut(), record);
        for slot in old.into_values() {
            if let BindingSlot::Bound(b) = slot {
                b.detach();
            }
        }
    }

    /// Store a value without notifying.
    pub(crate) fn assign_raw(&self, key: &str, value: Value) {
        self.values.borrow_mut().insert(key.to_owned(), value);
    }
}

impl Drop for BindableObject {
    fn drop(&mut self) {
        for slot in self.bindings.get_mut().values() {
            if let BindingSlot::Bound(b) = slot {
                b.detach();
            }
        }
    }
}

impl fmt::Debug for BindableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.try_borrow();
        f.debug_struct("BindableObject")
            .field("type_name", &self.type_name)
            .field(
                "id",
                &values
                    .as_ref()
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or_default(),
            )
            .finish_non_exhaustive()
    }
}
