#![forbid(unsafe_code)]

//! Polymorphic JSON serialization.
//!
//! Every non-primitive value serializes to a JSON object carrying a
//! `__type__` tag that names its [`TypeRegistry`](crate::registry::TypeRegistry)
//! entry. Arrays serialize element-wise and carry no tag. Deserialization
//! reverses this: untagged objects are plain data and come back verbatim,
//! tagged ones are handed to the decoder registered for the tag.
//!
//! # Wire form
//!
//! | Rust value | JSON |
//! |------------|------|
//! | `Null`, `Bool`, `Number`, `String` | the JSON primitive |
//! | `Array` | array of serialized elements |
//! | `Map` | `{"__type__": "Object", ...fields}` |
//! | bindable object | `{"__type__": <type name>, ...properties, "bindings": {...}, ...events}` |
//! | binding | `{"__type__": "ElementBinding", "sourceKey", "path", "converter", ...}` |
//! | event | `{"__type__": "BindableEvent", "tasks": [...]}` |
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Unknown `__type__` tag | [`SerializeError::UnregisteredType`] |
//! | A field of a plain `Object` map fails to decode | `warn!`, field skipped |
//! | Decoded value has the wrong shape for its slot | [`SerializeError::UnexpectedShape`] |

pub mod hooks;

use std::rc::Rc;

use serde_json::Value as Json;

use crate::binding::BindingRef;
use crate::error::SerializeError;
use crate::event::{BindableEvent, Task};
use crate::object::BindingsRecord;
use crate::runtime::Runtime;
use crate::value::{Value, number_to_json};

/// Reserved field naming a serialized value's registry tag.
pub const TYPE_FIELD: &str = "__type__";

/// Tag of plain maps.
pub const OBJECT_TAG: &str = "Object";

pub type JsonMap = serde_json::Map<String, Json>;

/// Switches consulted while serializing and deserializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeContext {
    /// Deserialize bindable objects with freshly generated `id` and `key`.
    pub new_instance: bool,
    /// Omit properties whose state is `default`.
    pub exclude_defaults: bool,
    /// Omit the current value of properties whose state is `binding`.
    pub exclude_bindings: bool,
}

impl SerializeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_instance(mut self) -> Self {
        self.new_instance = true;
        self
    }

    #[must_use]
    pub fn exclude_defaults(mut self) -> Self {
        self.exclude_defaults = true;
        self
    }

    #[must_use]
    pub fn exclude_bindings(mut self) -> Self {
        self.exclude_bindings = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Types with a JSON form in the tagged protocol.
pub trait Serializable {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError>;
}

impl Serializable for Value {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        Ok(match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|v| v.serialize(context))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut out = JsonMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.serialize(context)?);
                }
                tagged(OBJECT_TAG, out)
            }
            Value::Object(object) => object.serialize(context)?,
        })
    }
}

impl Serializable for Task {
    fn serialize(&self, _: &SerializeContext) -> Result<Json, SerializeError> {
        match serde_json::to_value(self)? {
            Json::Object(map) => Ok(tagged(OBJECT_TAG, map)),
            other => Ok(other),
        }
    }
}

impl<T: Serializable + ?Sized> Serializable for Rc<T> {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        (**self).serialize(context)
    }
}

impl<T: Serializable> Serializable for [T] {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        Ok(Json::Array(
            self.iter()
                .map(|item| item.serialize(context))
                .collect::<Result<_, _>>()?,
        ))
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        self.as_slice().serialize(context)
    }
}

/// Insert the type tag into a serialized field map.
pub(crate) fn tagged(tag: &str, mut map: JsonMap) -> Json {
    map.insert(TYPE_FIELD.to_owned(), Json::String(tag.to_owned()));
    Json::Object(map)
}

pub fn serialize<T: Serializable + ?Sized>(
    value: &T,
    context: &SerializeContext,
) -> Result<Json, SerializeError> {
    value.serialize(context)
}

pub fn to_json_string<T: Serializable + ?Sized>(
    value: &T,
    context: &SerializeContext,
) -> Result<String, SerializeError> {
    Ok(serde_json::to_string(&value.serialize(context)?)?)
}

// ---------------------------------------------------------------------------
// Deserialization
// ---------------------------------------------------------------------------

/// Result of decoding one JSON value.
#[derive(Debug)]
pub enum Decoded {
    Value(Value),
    List(Vec<Decoded>),
    Binding(BindingRef),
    Event(BindableEvent),
    Bindings(BindingsRecord),
}

impl Decoded {
    fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::List(_) => "list",
            Self::Binding(_) => "binding",
            Self::Event(_) => "event",
            Self::Bindings(_) => "bindings record",
        }
    }

    fn mismatch(self, expected: &'static str) -> SerializeError {
        SerializeError::UnexpectedShape {
            expected,
            found: self.shape().to_owned(),
        }
    }

    /// The decoded value; lists must hold values only.
    pub fn into_value(self) -> Result<Value, SerializeError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::List(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(Decoded::into_value)
                    .collect::<Result<_, _>>()?,
            )),
            other => Err(other.mismatch("value")),
        }
    }

    pub fn into_binding(self) -> Result<BindingRef, SerializeError> {
        match self {
            Self::Binding(b) => Ok(b),
            other => Err(other.mismatch("binding")),
        }
    }

    pub fn into_event(self) -> Result<BindableEvent, SerializeError> {
        match self {
            Self::Event(e) => Ok(e),
            other => Err(other.mismatch("event")),
        }
    }

    pub fn into_bindings(self) -> Result<BindingsRecord, SerializeError> {
        match self {
            Self::Bindings(r) => Ok(r),
            other => Err(other.mismatch("bindings record")),
        }
    }

    pub fn into_list(self) -> Result<Vec<Decoded>, SerializeError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }
}

/// Decoding session bound to one runtime.
pub struct Deserializer<'a> {
    runtime: &'a Rc<Runtime>,
    context: SerializeContext,
}

impl<'a> Deserializer<'a> {
    #[must_use]
    pub fn new(runtime: &'a Rc<Runtime>, context: SerializeContext) -> Self {
        Self { runtime, context }
    }

    #[must_use]
    pub fn runtime(&self) -> &'a Rc<Runtime> {
        self.runtime
    }

    #[must_use]
    pub fn context(&self) -> &SerializeContext {
        &self.context
    }

    pub fn deserialize(&mut self, json: Json) -> Result<Decoded, SerializeError> {
        match json {
            Json::Array(items) => Ok(Decoded::List(
                items
                    .into_iter()
                    .map(|item| self.deserialize(item))
                    .collect::<Result<_, _>>()?,
            )),
            Json::Object(mut map) => {
                let tag = match map.get(TYPE_FIELD) {
                    Some(Json::String(tag)) => tag.clone(),
                    _ => return Ok(Decoded::Value(Value::from_json(Json::Object(map)))),
                };
                let registration = self
                    .runtime
                    .types()
                    .lookup(&tag)
                    .ok_or(SerializeError::UnregisteredType(tag))?;
                map.remove(TYPE_FIELD);
                (registration.deserialize)(self, map)
            }
            primitive => Ok(Decoded::Value(Value::from_json(primitive))),
        }
    }

    /// Decode and require a value.
    pub fn value(&mut self, json: Json) -> Result<Value, SerializeError> {
        self.deserialize(json)?.into_value()
    }
}

pub fn deserialize(
    runtime: &Rc<Runtime>,
    json: Json,
    context: SerializeContext,
) -> Result<Decoded, SerializeError> {
    Deserializer::new(runtime, context).deserialize(json)
}

pub fn from_json_str(
    runtime: &Rc<Runtime>,
    text: &str,
    context: SerializeContext,
) -> Result<Decoded, SerializeError> {
    deserialize(runtime, serde_json::from_str(text)?, context)
}
