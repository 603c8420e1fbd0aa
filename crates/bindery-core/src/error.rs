#![forbid(unsafe_code)]

//! Error types for the reactive core.
//!
//! Every variant here is a programmer or configuration error: it is returned
//! from the offending call and never recovered internally. Data-quality
//! problems (failed conversions, fields that do not deserialize) and
//! resolution misses are logged through `tracing` instead and do not appear
//! in these enums.

use thiserror::Error;

use crate::convert::ConverterKey;

/// Errors from the type-tag registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The tag is already bound to a different type.
    #[error("type tag '{0}' has been registered")]
    DuplicateTag(String),
    /// No type is registered under the tag.
    #[error("unregistered type '{0}': declare it serializable or serialize an instance first")]
    UnknownTag(String),
}

/// Errors from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Field names must be non-empty.
    #[error("invalid field name {0:?} on type '{1}'")]
    InvalidFieldName(String, String),
    /// The type (or the parent it names) has not been defined.
    #[error("unknown object type '{0}'")]
    UnknownType(String),
    /// A type with this name already exists.
    #[error("object type '{0}' has already been defined")]
    DuplicateType(String),
}

/// Errors from the converter registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterError {
    /// Converter keys must be non-empty.
    #[error("{0:?} is not a valid converter key")]
    InvalidKey(String),
    /// A converter is already registered under the key.
    #[error("a converter named '{0}' has already been registered")]
    AlreadyRegistered(ConverterKey),
    /// A declared capability does not line up with `convert`.
    #[error("converter '{key}': {detail}")]
    SignatureMismatch { key: ConverterKey, detail: String },
}

/// Errors raised while attaching bindings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The binding already feeds another property.
    #[error("the binding is already bound to {owner}")]
    AlreadyAttached { owner: String },
    /// A multi-binding source is already attached elsewhere.
    #[error("the binding sources[{index}] is already bound to {owner}")]
    SourceAlreadyAttached { index: usize, owner: String },
}

/// Errors from the bindable object model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// Abstract types cannot be instantiated.
    #[error("cannot instantiate abstract type '{0}'")]
    AbstractType(String),
    /// The type has not been declared in the metadata store.
    #[error("unknown object type '{0}'")]
    UnknownType(String),
    /// The type declares no property with this name.
    #[error("type '{type_name}' has no property '{key}'")]
    UnknownProperty { type_name: String, key: String },
    /// The type declares no event with this name.
    #[error("type '{type_name}' has no event '{key}'")]
    UnknownEvent { type_name: String, key: String },
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Errors from the serialization protocol.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// A `__type__` tag that no registry entry claims.
    #[error("unregistered type '{0}' in serialized form")]
    UnregisteredType(String),
    /// The decoded shape does not fit where it was found.
    #[error("expected {expected} while deserializing, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: String,
    },
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors produced while dispatching event tasks to actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The task names a member that is not an action.
    #[error("'{name}' on object {key} is not an action")]
    NotAnAction { key: String, name: String },
    /// The action ran and reported failure.
    #[error("action failed: {0}")]
    Failed(String),
}

/// Errors from loading a [`RuntimeConfig`](crate::runtime::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "config-file")]
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Crate-level error covering every component.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Converter(#[from] ConverterError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
