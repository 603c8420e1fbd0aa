#![forbid(unsafe_code)]

//! Dynamic values stored in property slots.
//!
//! A [`Value`] is what a property holds, what a binding resolves and what a
//! converter transforms. It mirrors JSON plus one extra variant,
//! [`Value::Object`], a shared handle to a live
//! [`BindableObject`](crate::object::BindableObject).
//!
//! # Invariants
//!
//! 1. `Null`, `Bool`, `Number` and `String` are *scalar*. Writing an equal
//!    scalar to a property is a no-op; writing any non-scalar always notifies.
//! 2. Equality on `Object` is identity (`Rc::ptr_eq`), never structural.
//! 3. Path reads never panic: anything that cannot be read is `None`.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::object::{BindableObject, ObjectRef};

/// Most `Null` elements a single write may append to pad an array.
pub const MAX_ARRAY_PADDING: usize = 1024;

/// A dynamic property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    /// Plain keyed data. Serialized with the `Object` tag.
    Map(BTreeMap<String, Value>),
    /// A live bindable object.
    Object(ObjectRef),
}

impl Value {
    /// Whether writes of an equal value may be suppressed.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        )
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The type token describing this value.
    #[must_use]
    pub fn type_token(&self) -> TypeToken {
        match self {
            Self::Null => TypeToken::Any,
            Self::Bool(_) => TypeToken::Bool,
            Self::Number(_) => TypeToken::Number,
            Self::String(_) => TypeToken::String,
            Self::Array(_) => TypeToken::Array,
            Self::Map(_) => TypeToken::Map,
            Self::Object(obj) => TypeToken::Object(obj.type_name().to_owned()),
        }
    }

    /// Read one path segment off this value.
    ///
    /// `Key` reads a property of an object or an entry of a map; `Index`
    /// reads an array element (or the decimal key of a map).
    #[must_use]
    pub fn get_segment(&self, segment: &PathSegment) -> Option<Value> {
        match (self, segment) {
            (Self::Object(obj), PathSegment::Key(name)) => obj.get(name),
            (Self::Map(map), PathSegment::Key(name)) => map.get(name).cloned(),
            (Self::Map(map), PathSegment::Index(i)) => map.get(&i.to_string()).cloned(),
            (Self::Array(items), PathSegment::Index(i)) => items.get(*i).cloned(),
            _ => None,
        }
    }

    /// Write `value` at `path` inside nested maps and arrays.
    ///
    /// Missing map entries are created and arrays are padded with `Null`, by
    /// at most [`MAX_ARRAY_PADDING`] elements. Returns `false` when a segment
    /// does not fit the container it meets or the padding would exceed that.
    pub fn set_path(&mut self, path: &[PathSegment], value: Value) -> bool {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return true;
        };
        if self.is_null() {
            *self = match first {
                PathSegment::Key(_) => Self::Map(BTreeMap::new()),
                PathSegment::Index(_) => Self::Array(Vec::new()),
            };
        }
        let slot = match (self, first) {
            (Self::Map(map), PathSegment::Key(name)) => map.entry(name.clone()).or_default(),
            (Self::Map(map), PathSegment::Index(i)) => map.entry(i.to_string()).or_default(),
            (Self::Array(items), PathSegment::Index(i)) => {
                let i = *i;
                if i >= items.len() {
                    let Some(len) = i
                        .checked_add(1)
                        .filter(|len| len - items.len() <= MAX_ARRAY_PADDING)
                    else {
                        return false;
                    };
                    items.resize(len, Value::Null);
                }
                &mut items[i]
            }
            _ => return false,
        };
        slot.set_path(rest, value)
    }

    /// JavaScript `String(value)` semantics.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Array(items) => items
                .iter()
                .map(|v| match v {
                    Self::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) | Self::Object(_) => "[object Object]".to_owned(),
        }
    }

    /// JavaScript `Number(value)` semantics.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => parse_number(s),
            Self::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            Self::Map(_) | Self::Object(_) => f64::NAN,
        }
    }

    /// JavaScript truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Map(_) | Self::Object(_) => true,
        }
    }

    /// Convert plain JSON verbatim. `__type__` keys are kept as data.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Json::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
        }
    }

    /// Plain JSON for values without live objects; `None` otherwise.
    #[must_use]
    pub fn to_plain_json(&self) -> Option<Json> {
        Some(match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Json::String(s.clone()),
            Self::Array(items) => Json::Array(
                items
                    .iter()
                    .map(Self::to_plain_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| v.to_plain_json().map(|j| (k.clone(), j)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Self::Object(_) => return None,
        })
    }
}

/// Integral numbers become JSON integers so ids round-trip as `3`, not `3.0`.
pub(crate) fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        // f64's Display already prints integral values without a fraction.
        n.to_string()
    }
}

fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    match t {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            let lower = t.to_ascii_lowercase();
            if lower.contains("inf") || lower.contains("nan") {
                f64::NAN
            } else {
                t.parse().unwrap_or(f64::NAN)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Map(map) => f.debug_map().entries(map).finish(),
            Self::Object(obj) => write!(f, "Object({}#{})", obj.type_name(), obj.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<&ObjectRef> for Value {
    fn from(obj: &ObjectRef) -> Self {
        Self::Object(Rc::clone(obj))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// The declared type of a property, event or converter endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeToken {
    #[default]
    Any,
    Bool,
    Number,
    String,
    Array,
    Map,
    /// A bindable object type, by declared name.
    Object(String),
    /// An event type, by registry tag.
    Event(String),
}

impl TypeToken {
    /// `Any` is compatible with everything; other tokens only with themselves.
    #[must_use]
    pub fn compatible(&self, other: &TypeToken) -> bool {
        matches!(self, Self::Any) || matches!(other, Self::Any) || self == other
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Bool => f.write_str("bool"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Array => f.write_str("array"),
            Self::Map => f.write_str("map"),
            Self::Object(name) => write!(f, "object<{name}>"),
            Self::Event(name) => write!(f, "event<{name}>"),
        }
    }
}

/// One step of a binding path: a property name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    /// Whether this segment names the property `name`.
    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        matches!(self, Self::Key(k) if k == name)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Key(s.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Key(s)
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// Build a path from anything convertible to segments.
pub fn path<I, S>(segments: I) -> Vec<PathSegment>
where
    I: IntoIterator<Item = S>,
    S: Into<PathSegment>,
{
    segments.into_iter().map(Into::into).collect()
}

/// Readable `a.b[0].c` form for log fields.
pub(crate) fn display_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            PathSegment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_rule() {
        assert!(Value::Null.is_scalar());
        assert!(Value::from(1).is_scalar());
        assert!(Value::from("x").is_scalar());
        assert!(!Value::Array(vec![]).is_scalar());
        assert!(!Value::Map(BTreeMap::new()).is_scalar());
    }

    #[test]
    fn display_string_matches_js() {
        assert_eq!(Value::from(1).to_display_string(), "1");
        assert_eq!(Value::from(1.5).to_display_string(), "1.5");
        assert_eq!(Value::Number(f64::NAN).to_display_string(), "NaN");
        assert_eq!(
            Value::Array(vec![1.into(), Value::Null, "a".into()]).to_display_string(),
            "1,,a"
        );
        assert_eq!(Value::Map(BTreeMap::new()).to_display_string(), "[object Object]");
    }

    #[test]
    fn number_coercion_matches_js() {
        assert_eq!(Value::from(" 12 ").to_number(), 12.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert_eq!(Value::from(true).to_number(), 1.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert!(Value::from("inf").to_number().is_nan());
        assert_eq!(Value::from("-Infinity").to_number(), f64::NEG_INFINITY);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn segment_reads() {
        let v = Value::from_json(json!({"a": [10, {"b": "deep"}]}));
        let a = v.get_segment(&"a".into()).unwrap();
        assert_eq!(a.get_segment(&0.into()), Some(Value::from(10)));
        let inner = a.get_segment(&1.into()).unwrap();
        assert_eq!(inner.get_segment(&"b".into()), Some(Value::from("deep")));
        assert_eq!(v.get_segment(&"missing".into()), None);
        assert_eq!(Value::from(3).get_segment(&"a".into()), None);
    }

    #[test]
    fn set_path_creates_and_pads() {
        let mut v = Value::Map(BTreeMap::new());
        assert!(v.set_path(&path(["x", "y"]), Value::from(1)));
        assert_eq!(v.to_plain_json(), Some(json!({"x": {"y": 1}})));

        let mut arr = Value::Array(vec![]);
        assert!(arr.set_path(&[PathSegment::Index(2)], Value::from("z")));
        assert_eq!(arr.to_plain_json(), Some(json!([null, null, "z"])));

        let mut scalar = Value::from(1);
        assert!(!scalar.set_path(&path(["x"]), Value::Null));
    }

    #[test]
    fn set_path_fills_null_slots() {
        let mut v = Value::Null;
        assert!(v.set_path(&[PathSegment::from("rows"), PathSegment::Index(1)], Value::from(2)));
        assert_eq!(v.to_plain_json(), Some(json!({"rows": [null, 2]})));
    }

    #[test]
    fn set_path_refuses_huge_indices() {
        let mut arr = Value::from_json(json!([1, 2]));
        assert!(!arr.set_path(&[PathSegment::Index(usize::MAX)], Value::from("x")));
        assert!(!arr.set_path(
            &[PathSegment::Index(2 + MAX_ARRAY_PADDING)],
            Value::from("x")
        ));
        assert_eq!(arr.to_plain_json(), Some(json!([1, 2])));

        assert!(arr.set_path(
            &[PathSegment::Index(1 + MAX_ARRAY_PADDING)],
            Value::from("x")
        ));
        assert_eq!(arr.as_array().map(<[Value]>::len), Some(2 + MAX_ARRAY_PADDING));
    }

    #[test]
    fn integral_numbers_stay_integral_in_json() {
        assert_eq!(number_to_json(3.0), json!(3));
        assert_eq!(number_to_json(2.5), json!(2.5));
        assert_eq!(number_to_json(f64::NAN), Json::Null);
    }

    #[test]
    fn path_segments_serialize_untagged() {
        let p = path::<_, PathSegment>(["form".into(), 0usize.into()]);
        assert_eq!(serde_json::to_value(&p).unwrap(), json!(["form", 0]));
        let back: Vec<PathSegment> = serde_json::from_value(json!(["a", 2])).unwrap();
        assert_eq!(back, vec![PathSegment::from("a"), PathSegment::Index(2)]);
        assert_eq!(display_path(&back), "a[2]");
    }

    #[test]
    fn type_token_compatibility() {
        assert!(TypeToken::Any.compatible(&TypeToken::Number));
        assert!(TypeToken::String.compatible(&TypeToken::String));
        assert!(!TypeToken::String.compatible(&TypeToken::Number));
    }
}
