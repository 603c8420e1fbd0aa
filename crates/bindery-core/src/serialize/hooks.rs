#![forbid(unsafe_code)]

//! Per-type serialization hooks for the crate's own types.
//!
//! Bindable objects restore their bindings record before anything else, so
//! every other field knows which state it lands in:
//!
//! | Slot in the record | Field in the JSON |
//! |--------------------|-------------------|
//! | `null` (default) | ignored, the fresh default stays |
//! | absent (local) | decoded and `set` |
//! | binding | decoded into the slot without notification, then `bind` |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{
    Decoded, Deserializer, JsonMap, OBJECT_TAG, Serializable, SerializeContext, tagged,
};
use crate::binding::{Binding, BindingKind, BindingOptions, BindingRef};
use crate::convert::ConverterKey;
use crate::error::{ObjectError, SerializeError};
use crate::event::{BindableEvent, EVENT_TAG, Task};
use crate::metadata::object_registration;
use crate::object::{BindableObject, BindingSlot, BindingsRecord, ObjectKey, PropertyState};
use crate::registry::{TypeIdentity, TypeRegistration};
use crate::value::{PathSegment, Value};

/// Tag of a serialized bindings record.
pub const BINDINGS_TAG: &str = "BindingsRecord";

/// Field holding an object's bindings record.
pub const BINDINGS_FIELD: &str = "bindings";

/// Registrations seeded into every runtime (the root object type excepted).
pub(crate) fn builtin_registrations() -> Vec<TypeRegistration> {
    let mut all = vec![
        TypeRegistration::new(OBJECT_TAG, TypeIdentity::Builtin(OBJECT_TAG), |de, json| {
            Ok(Decoded::Value(Value::Map(decode_fields(de, json))))
        }),
        TypeRegistration::new(BINDINGS_TAG, TypeIdentity::Builtin(BINDINGS_TAG), |de, json| {
            decode_bindings_record(de, json).map(Decoded::Bindings)
        }),
        event_registration(EVENT_TAG.to_owned()),
    ];
    all.extend(BindingKind::ALL.into_iter().map(|kind| {
        TypeRegistration::new(kind.tag(), TypeIdentity::Builtin(kind.tag()), move |de, json| {
            decode_binding(de, kind, json).map(Decoded::Binding)
        })
    }));
    all
}

/// Registration for an event type tag.
pub(crate) fn event_registration(tag: String) -> TypeRegistration {
    let decode_as = tag.clone();
    TypeRegistration::new(tag.clone(), TypeIdentity::Event(tag), move |de, json| {
        Ok(Decoded::Event(decode_event(de, &decode_as, json)))
    })
}

/// Structural decoding: every field is decoded independently and a field
/// that fails is logged and dropped.
fn decode_fields(de: &mut Deserializer<'_>, json: JsonMap) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, field) in json {
        match de.value(field) {
            Ok(v) => {
                out.insert(key, v);
            }
            Err(err) => {
                tracing::warn!(field = %key, error = %err, "field failed to deserialize; skipped");
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Bindable objects
// ---------------------------------------------------------------------------

impl Serializable for BindableObject {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        let mut out = JsonMap::new();
        let info = self.info();
        for (key, prop) in &info.properties {
            let skip = (context.exclude_bindings && prop.state == PropertyState::Binding)
                || (context.exclude_defaults && prop.state == PropertyState::Default);
            if skip {
                continue;
            }
            let value = self.get(key).unwrap_or_default();
            out.insert(key.clone(), value.serialize(context)?);
        }
        out.insert(BINDINGS_FIELD.to_owned(), self.bindings().serialize(context)?);
        for (name, event) in self.events() {
            out.insert(name, event.serialize(context)?);
        }
        self.runtime()
            .types()
            .ensure(object_registration(self.type_name().to_owned()))?;
        Ok(tagged(self.type_name(), out))
    }
}

impl Serializable for BindingsRecord {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        let mut out = JsonMap::new();
        for (key, slot) in self {
            match slot {
                BindingSlot::Default => {
                    out.insert(key.clone(), Json::Null);
                }
                BindingSlot::Local => {}
                BindingSlot::Bound(binding) => {
                    out.insert(key.clone(), binding.serialize(context)?);
                }
            }
        }
        Ok(tagged(BINDINGS_TAG, out))
    }
}

/// Entries present in a serialized record: `null` slots and bindings.
/// Entries that fail to decode are logged and dropped.
fn decode_bindings_record(
    de: &mut Deserializer<'_>,
    json: JsonMap,
) -> Result<BindingsRecord, SerializeError> {
    let mut record = BindingsRecord::new();
    for (key, field) in json {
        if field.is_null() {
            record.insert(key, BindingSlot::Default);
            continue;
        }
        match de.deserialize(field).and_then(Decoded::into_binding) {
            Ok(binding) => {
                record.insert(key, BindingSlot::Bound(binding));
            }
            Err(err) => {
                tracing::warn!(field = %key, error = %err, "binding failed to deserialize; skipped");
            }
        }
    }
    Ok(record)
}

/// Decoder of every declared bindable object type.
pub(crate) fn deserialize_object(
    de: &mut Deserializer<'_>,
    type_name: &str,
    mut json: JsonMap,
) -> Result<Decoded, SerializeError> {
    let instance = de.runtime().create(type_name)?;

    let mut record = instance.bindings();
    if let Some(stored) = json.remove(BINDINGS_FIELD).filter(|j| !j.is_null()) {
        let mut stored = de.deserialize(stored)?.into_bindings()?;
        for (key, slot) in record.iter_mut() {
            *slot = stored.remove(key).unwrap_or(BindingSlot::Local);
        }
        instance.replace_bindings(record.clone());
    }

    let events: BTreeSet<String> = instance.events().into_iter().map(|(k, _)| k).collect();
    let mut seen = BTreeSet::new();
    for (key, field) in json {
        if events.contains(&key) {
            if !field.is_null() {
                match de.deserialize(field).and_then(Decoded::into_event) {
                    Ok(event) => instance.install_event(&key, event),
                    Err(err) => {
                        tracing::warn!(
                            type_name,
                            field = %key,
                            error = %err,
                            "event failed to deserialize; skipped"
                        );
                    }
                }
            }
            continue;
        }
        if de.context().new_instance && (key == "id" || key == "key") {
            continue;
        }
        let slot = match record.get(&key) {
            None => {
                tracing::debug!(type_name, field = %key, "undeclared field skipped");
                continue;
            }
            Some(BindingSlot::Default) => continue,
            Some(slot) => slot,
        };
        let value = match de.value(field) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    type_name,
                    field = %key,
                    error = %err,
                    "field failed to deserialize; skipped"
                );
                continue;
            }
        };
        match slot {
            BindingSlot::Bound(binding) => {
                instance.assign_raw(&key, value);
                instance.bind(&key, binding)?;
                seen.insert(key);
            }
            _ => instance.set(&key, value)?,
        }
    }

    // Snapshots taken with `exclude_bindings` carry no value for bound keys.
    for (key, slot) in &record {
        if let BindingSlot::Bound(binding) = slot
            && !seen.contains(key)
        {
            instance.bind(key, binding)?;
        }
    }
    Ok(Decoded::Value(Value::Object(instance)))
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

fn default_converter() -> Option<ConverterKey> {
    Some(ConverterKey::default_converter())
}

/// Serialized fields shared by every binding shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<Vec<PathSegment>>,
    #[serde(default = "default_converter")]
    converter: Option<ConverterKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    converter_parameter: Option<String>,
}

impl Serializable for Binding {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        let fields = BindingFields {
            source_key: self.source_key().cloned(),
            path: self.path().map(<[PathSegment]>::to_vec),
            converter: self.converter().cloned(),
            converter_parameter: self.converter_parameter().map(str::to_owned),
        };
        let Json::Object(mut out) = serde_json::to_value(&fields)? else {
            return Err(SerializeError::UnexpectedShape {
                expected: "binding fields",
                found: "non-object".to_owned(),
            });
        };
        if let Some(multi) = self.as_multi() {
            out.insert("sources".to_owned(), multi.sources().serialize(context)?);
        }
        Ok(tagged(self.kind().tag(), out))
    }
}

fn decode_binding(
    de: &mut Deserializer<'_>,
    kind: BindingKind,
    mut json: JsonMap,
) -> Result<BindingRef, SerializeError> {
    let sources = json.remove("sources");
    let fields: BindingFields = serde_json::from_value(Json::Object(json))?;
    let options = BindingOptions {
        converter: fields.converter,
        parameter: fields.converter_parameter,
    };
    let runtime = de.runtime();
    let path = fields.path.unwrap_or_default();
    Ok(match kind {
        BindingKind::Element | BindingKind::BidirectionalElement => Binding::path_binding(
            runtime,
            fields.source_key,
            path,
            options,
            kind == BindingKind::BidirectionalElement,
        ),
        BindingKind::ElementTemplate | BindingKind::BidirectionalElementTemplate => {
            Binding::template(
                runtime,
                path,
                kind == BindingKind::BidirectionalElementTemplate,
                options,
            )
        }
        BindingKind::Multi => {
            let sources = match sources {
                Some(json) if !json.is_null() => de
                    .deserialize(json)?
                    .into_list()?
                    .into_iter()
                    .map(Decoded::into_binding)
                    .collect::<Result<Vec<_>, _>>()?,
                _ => Vec::new(),
            };
            Binding::multi(runtime, sources, options).map_err(ObjectError::from)?
        }
    })
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

impl Serializable for BindableEvent {
    fn serialize(&self, context: &SerializeContext) -> Result<Json, SerializeError> {
        let mut out = JsonMap::new();
        for (key, value) in self.extra() {
            out.insert(key.clone(), value.serialize(context)?);
        }
        out.insert("tasks".to_owned(), Serializable::serialize(self.tasks(), context)?);
        Ok(tagged(self.type_tag(), out))
    }
}

/// Ownerless event; the object installing it adopts it.
fn decode_event(de: &mut Deserializer<'_>, tag: &str, mut json: JsonMap) -> BindableEvent {
    let tasks = json
        .remove("tasks")
        .map(|field| decode_tasks(de, field))
        .unwrap_or_default();
    let mut event = BindableEvent::tagged(tag).with_tasks(tasks);
    for (key, value) in decode_fields(de, json) {
        event = event.with_extra(key, value);
    }
    event
}

fn decode_tasks(de: &mut Deserializer<'_>, json: Json) -> Vec<Task> {
    let plain = de
        .value(json)
        .ok()
        .and_then(|v| v.to_plain_json())
        .map(serde_json::from_value::<Vec<Task>>);
    match plain {
        Some(Ok(tasks)) => tasks,
        Some(Err(err)) => {
            tracing::warn!(error = %err, "event tasks failed to deserialize; skipped");
            Vec::new()
        }
        None => {
            tracing::warn!("event tasks are not plain data; skipped");
            Vec::new()
        }
    }
}
