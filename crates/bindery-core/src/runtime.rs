#![forbid(unsafe_code)]

//! The runtime: owner of every registry an object graph needs.
//!
//! A [`Runtime`] is constructed explicitly and handed down as `Rc<Runtime>`.
//! It owns the type-tag registry, the metadata store, the converter
//! registry, the template loader table, the message bus, the object
//! resolver slot and the design-mode flag. Two runtimes never share state,
//! which keeps tests isolated from each other.
//!
//! # Failure Modes
//!
//! - Resolver not installed: every key resolves to `None` and bindings
//!   produce no value until one is installed.
//! - Resolver re-entry: the resolver is cloned out of its slot before being
//!   called, so a resolver may itself use the runtime.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::convert::{ConverterKey, ConverterRegistry, ValueConverter, builtin};
use crate::error::{ConfigError, ConverterError, Error, ObjectError, RegistryError};
use crate::messaging::MessageBus;
use crate::metadata::{self, MetadataStore, PropertyDescriptor, ROOT_TYPE};
use crate::object::{BindableObject, ObjectKey, ObjectRef};
use crate::registry::TypeRegistry;
use crate::serialize::hooks;
use crate::template::TemplateLoaders;
use crate::value::TypeToken;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Startup options. Missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Events emitted while set are logged and not dispatched.
    pub design_mode: bool,
    /// Register the built-in converter set.
    pub builtin_converters: bool,
    /// Run the best-effort signature check when converters register.
    pub check_converter_signatures: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            design_mode: false,
            builtin_converters: true,
            check_converter_signatures: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Object resolution
// ---------------------------------------------------------------------------

/// Host-supplied lookup from an object key to a live object.
pub trait ObjectResolver {
    fn resolve(&self, key: &ObjectKey) -> Option<ObjectRef>;
}

impl<F> ObjectResolver for F
where
    F: Fn(&ObjectKey) -> Option<ObjectRef>,
{
    fn resolve(&self, key: &ObjectKey) -> Option<ObjectRef> {
        self(key)
    }
}

/// A resolver that indexes objects by key without owning them.
///
/// Only `Weak` handles are kept: an object dropped elsewhere stops
/// resolving, and the store never forms a cycle with the runtime.
#[derive(Default)]
pub struct ObjectStore {
    objects: RefCell<BTreeMap<ObjectKey, Weak<BindableObject>>>,
}

impl ObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `object` under its current key.
    pub fn insert(&self, object: &ObjectRef) {
        self.objects
            .borrow_mut()
            .insert(object.key(), Rc::downgrade(object));
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<ObjectRef> {
        self.objects
            .borrow_mut()
            .remove(key)
            .and_then(|w| w.upgrade())
    }

    /// Drop entries whose objects no longer exist.
    pub fn prune(&self) {
        self.objects.borrow_mut().retain(|_, w| w.strong_count() > 0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectResolver for ObjectStore {
    fn resolve(&self, key: &ObjectKey) -> Option<ObjectRef> {
        self.objects.borrow().get(key).and_then(Weak::upgrade)
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Dependency-injection root for objects, bindings and serialization.
pub struct Runtime {
    config: RuntimeConfig,
    types: TypeRegistry,
    metadata: MetadataStore,
    converters: ConverterRegistry,
    loaders: TemplateLoaders,
    bus: MessageBus,
    resolver: RefCell<Option<Rc<dyn ObjectResolver>>>,
    design_mode: Cell<bool>,
}

impl Runtime {
    /// Build a runtime with the root type, built-in tags, template loaders
    /// and (unless disabled) the built-in converters.
    ///
    /// Seeding writes a fixed set of distinct entries into empty registries,
    /// so it has no failing input. Use [`Runtime::try_new`] to observe a
    /// seeding error instead of logging it.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Rc<Self> {
        let (runtime, seeded) = Self::build(config);
        if let Err(err) = seeded {
            tracing::error!(error = %err, "runtime seeding failed");
        }
        runtime
    }

    /// Like [`Runtime::new`], but a seeding failure is returned.
    pub fn try_new(config: RuntimeConfig) -> Result<Rc<Self>, Error> {
        let (runtime, seeded) = Self::build(config);
        seeded.map(|()| runtime)
    }

    fn build(config: RuntimeConfig) -> (Rc<Self>, Result<(), Error>) {
        let runtime = Self {
            config,
            types: TypeRegistry::new(),
            metadata: MetadataStore::new(),
            converters: ConverterRegistry::new(),
            loaders: TemplateLoaders::new(),
            bus: MessageBus::new(),
            resolver: RefCell::new(None),
            design_mode: Cell::new(config.design_mode),
        };
        let seeded = runtime.seed();
        tracing::debug!(
            design_mode = config.design_mode,
            builtin_converters = config.builtin_converters,
            seeded = seeded.is_ok(),
            "runtime created"
        );
        (Rc::new(runtime), seeded)
    }

    fn seed(&self) -> Result<(), Error> {
        self.metadata.define_type(ROOT_TYPE, None, false)?;
        self.metadata
            .declare(ROOT_TYPE, PropertyDescriptor::new("id", TypeToken::Number))?;
        self.metadata
            .declare(ROOT_TYPE, PropertyDescriptor::new("key", TypeToken::String))?;
        self.types
            .register(metadata::object_registration(ROOT_TYPE.to_owned()))?;
        for registration in hooks::builtin_registrations() {
            self.types.register(registration)?;
        }
        self.loaders.register_builtin();
        if self.config.builtin_converters {
            for (key, converter) in builtin::builtins() {
                self.converters.register_rc(key, converter)?;
            }
        }
        self.converters
            .set_check_signatures(self.config.check_converter_signatures);
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    #[must_use]
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    #[must_use]
    pub fn loaders(&self) -> &TemplateLoaders {
        &self.loaders
    }

    #[must_use]
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Register a converter under `name`.
    pub fn register_converter(
        &self,
        name: &str,
        converter: impl ValueConverter + 'static,
    ) -> Result<(), ConverterError> {
        self.converters.register(ConverterKey::new(name)?, converter)
    }

    /// Register an event type tag so tagged events deserialize.
    pub fn register_event_type(&self, tag: &str) -> Result<(), RegistryError> {
        self.types.register(hooks::event_registration(tag.to_owned()))
    }

    pub fn set_resolver(&self, resolver: Rc<dyn ObjectResolver>) {
        *self.resolver.borrow_mut() = Some(resolver);
    }

    pub fn clear_resolver(&self) {
        self.resolver.borrow_mut().take();
    }

    /// Install a fresh [`ObjectStore`] as the resolver and return it.
    pub fn install_store(&self) -> Rc<ObjectStore> {
        let store = Rc::new(ObjectStore::new());
        self.set_resolver(Rc::clone(&store) as Rc<dyn ObjectResolver>);
        store
    }

    /// Resolve an object key through the installed resolver.
    #[must_use]
    pub fn resolve(&self, key: &ObjectKey) -> Option<ObjectRef> {
        let resolver = self.resolver.borrow().clone()?;
        let found = resolver.resolve(key);
        if found.is_none() {
            tracing::debug!(key = %key, "object key did not resolve");
        }
        found
    }

    #[must_use]
    pub fn design_mode(&self) -> bool {
        self.design_mode.get()
    }

    pub fn set_design_mode(&self, on: bool) {
        self.design_mode.set(on);
    }

    /// Construct a fresh instance of a declared type.
    pub fn create(self: &Rc<Self>, type_name: &str) -> Result<ObjectRef, ObjectError> {
        BindableObject::new(self, type_name)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("design_mode", &self.design_mode.get())
            .field("types", &self.types)
            .field("converters", &self.converters)
            .finish_non_exhaustive()
    }
}
