#![forbid(unsafe_code)]

//! Bindery public facade.
//!
//! Re-exports [`bindery_core`] and offers a [`prelude`] with the types most
//! hosts need: a [`Runtime`](prelude::Runtime), type declarations, objects,
//! bindings, converters and the serialization entry points.

pub use bindery_core;

pub use bindery_core::{
    ActionDispatcher, BindableEvent, BindableObject, Binding, BindingKind, BindingOptions,
    BindingRef, Error, LoadOptions, ObjectKey, ObjectRef, ObjectStore, PropertyState, Runtime,
    RuntimeConfig, SerializeContext, Template, Value, path,
};

pub mod prelude {
    //! Glob-import surface: `use bindery::prelude::*;`.

    pub use bindery_core::convert::builtin;
    pub use bindery_core::serialize::{deserialize, from_json_str, serialize, to_json_string};
    pub use bindery_core::{
        ActionDescriptor, ActionDispatcher, BindableEvent, BindableObject, Binding,
        BindingError, BindingKind, BindingOptions, BindingRef, Conversion, ConverterInfo,
        ConverterKey, Error, EventDescriptor, LoadOptions, ObjectError, ObjectKey, ObjectRef,
        ObjectResolver, ObjectStore, PathSegment, PropertyDescriptor, PropertyState, Runtime,
        RuntimeConfig, Serializable, SerializeContext, SerializeError, Subscription, Task,
        Template, TypeDeclaration, TypeToken, Value, ValueConverter, path,
    };
}
