#![forbid(unsafe_code)]

//! Reactive data-binding core for Bindery.
//!
//! This crate provides:
//! - [`Runtime`] owning the type registry, metadata store, converter
//!   registry, template loaders and message bus
//! - [`BindableObject`] with default / local / binding property states
//! - [`Binding`] in element, bidirectional, multi-source and template shapes
//! - [`ValueConverter`] and the built-in converter set
//! - tagged JSON [`serialize`](serialize::serialize) /
//!   [`deserialize`](serialize::deserialize) and [`Template`] loading
//!
//! Everything is single-threaded: shared state lives behind `Rc` and
//! `RefCell`, and change notification is synchronous.

pub mod action;
pub mod binding;
pub mod convert;
pub mod error;
pub mod event;
pub mod messaging;
pub mod metadata;
pub mod object;
pub mod registry;
pub mod runtime;
pub mod serialize;
pub mod template;
pub mod value;

pub use action::ActionDispatcher;
pub use binding::{Bidirectional, Binding, BindingKind, BindingOptions, BindingRef, Multi};
pub use convert::{
    Conversion, ConvertBack, ConverterInfo, ConverterKey, ConverterRegistry, MultiConvert,
    ValueConverter,
};
pub use error::{
    ActionError, BindingError, ConfigError, ConverterError, Error, MetadataError, ObjectError,
    RegistryError, SerializeError,
};
pub use event::{BindableEvent, EventRef, Task};
pub use messaging::{EventEmitted, MessageBus, PropertyChanged, Subscription};
pub use metadata::{
    ActionDescriptor, EventDescriptor, FieldDescriptor, FieldInfo, FieldKind, MetadataStore,
    PropertyDescriptor, TypeDeclaration,
};
pub use object::{BindableObject, BindingSlot, ObjectInfo, ObjectKey, ObjectRef, PropertyState};
pub use registry::{TypeIdentity, TypeRegistration, TypeRegistry};
pub use runtime::{ObjectResolver, ObjectStore, Runtime, RuntimeConfig};
pub use serialize::{Decoded, Deserializer, Serializable, SerializeContext};
pub use template::{LoadOptions, Template};
pub use value::{PathSegment, TypeToken, Value, path};
