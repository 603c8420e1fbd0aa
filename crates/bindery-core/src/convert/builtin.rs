#![forbid(unsafe_code)]

//! Built-in converter set, registered by [`Runtime::new`] unless disabled.
//!
//! [`Runtime::new`]: crate::runtime::Runtime::new

use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::{
    Conversion, ConvertBack, ConverterInfo, ConverterKey, MultiConvert, ValueConverter, map_scalar,
};
use crate::value::{PathSegment, TypeToken, Value};

/// Every built-in converter with the key it registers under.
pub(crate) fn builtins() -> Vec<(ConverterKey, Rc<dyn ValueConverter>)> {
    let all: Vec<(&str, Rc<dyn ValueConverter>)> = vec![
        ("NoneConverter", Rc::new(NoneConverter)),
        ("DefaultConverter", Rc::new(DefaultConverter)),
        ("NumberConverter", Rc::new(NumberConverter)),
        ("BooleanConverter", Rc::new(BooleanConverter)),
        ("JsonConverter", Rc::new(JsonConverter)),
        ("DataUrlConverter", Rc::new(DataUrlConverter)),
        ("StringFormatConverter", Rc::new(StringFormatConverter)),
        ("DecimalPrecision", Rc::new(DecimalPrecision)),
        ("ObjectValue", Rc::new(ObjectValue)),
        ("ScientificNotation", Rc::new(ScientificNotation)),
        ("ArrayTranspose", Rc::new(ArrayTranspose)),
        ("ObjectPluck", Rc::new(ObjectPluck)),
        ("TraverseObject", Rc::new(TraverseObject)),
    ];
    all.into_iter()
        .filter_map(|(k, c)| ConverterKey::new(k).ok().map(|k| (k, c)))
        .collect()
}

// ---------------------------------------------------------------------------
// NoneConverter
// ---------------------------------------------------------------------------

/// Passes values through unchanged in every direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneConverter;

impl ValueConverter for NoneConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("pass-through", TypeToken::Any, TypeToken::Any)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        value.clone().into()
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }

    fn as_multi(&self) -> Option<&dyn MultiConvert> {
        Some(self)
    }
}

impl ConvertBack for NoneConverter {
    fn convert_back(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        value.clone().into()
    }
}

impl MultiConvert for NoneConverter {
    fn multi_convert(&self, values: &[Value], _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        Value::Array(values.to_vec()).into()
    }
}

// ---------------------------------------------------------------------------
// DefaultConverter
// ---------------------------------------------------------------------------

/// Coerces to the target property's type when it is a primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl DefaultConverter {
    fn coerce(value: &Value, target: Option<&TypeToken>) -> Value {
        match target {
            Some(TypeToken::String) => Value::String(value.to_display_string()),
            Some(TypeToken::Number) => Value::Number(value.to_number()),
            Some(TypeToken::Bool) => Value::Bool(match value {
                Value::Array(items) => !items.is_empty(),
                v if !v.is_truthy() => false,
                v => !v.to_display_string().trim().eq_ignore_ascii_case("false"),
            }),
            _ => value.clone(),
        }
    }
}

impl ValueConverter for DefaultConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("default", TypeToken::Any, TypeToken::Any)
    }

    fn convert(&self, value: &Value, _: Option<&str>, target: Option<&TypeToken>) -> Conversion {
        Self::coerce(value, target).into()
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }
}

impl ConvertBack for DefaultConverter {
    fn convert_back(&self, value: &Value, _: Option<&str>, target: Option<&TypeToken>) -> Conversion {
        Self::coerce(value, target).into()
    }
}

// ---------------------------------------------------------------------------
// NumberConverter
// ---------------------------------------------------------------------------

/// String to number; unparseable text fails (except a literal `NaN`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberConverter;

impl ValueConverter for NumberConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("string to number", TypeToken::String, TypeToken::Number)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| {
            let n = v.to_number();
            if n.is_nan() && !v.to_display_string().trim().eq_ignore_ascii_case("nan") {
                Conversion::Failed
            } else {
                Value::Number(n).into()
            }
        })
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }
}

impl ConvertBack for NumberConverter {
    fn convert_back(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| Value::String(v.to_display_string()).into())
    }

    fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
        Some((TypeToken::Number, TypeToken::String))
    }
}

// ---------------------------------------------------------------------------
// BooleanConverter
// ---------------------------------------------------------------------------

/// `true` when the value loosely equals the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanConverter;

/// JavaScript `value == parameter` for a string right-hand side.
fn loosely_equals(value: &Value, parameter: &str) -> bool {
    match value {
        Value::String(s) => s == parameter,
        Value::Number(n) => *n == Value::from(parameter).to_number(),
        Value::Bool(b) => f64::from(u8::from(*b)) == Value::from(parameter).to_number(),
        Value::Array(_) => value.to_display_string() == parameter,
        Value::Null | Value::Map(_) | Value::Object(_) => false,
    }
}

impl ValueConverter for BooleanConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("equals parameter", TypeToken::Any, TypeToken::Bool)
    }

    fn convert(&self, value: &Value, parameter: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| {
            Value::Bool(parameter.is_some_and(|p| !p.is_empty() && loosely_equals(v, p))).into()
        })
    }
}

// ---------------------------------------------------------------------------
// JsonConverter
// ---------------------------------------------------------------------------

/// Stringifies plain data; parses back, keeping unparseable text as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl ValueConverter for JsonConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("json to string", TypeToken::Any, TypeToken::String)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        if let Value::String(s) = value {
            return Value::String(s.clone()).into();
        }
        value
            .to_plain_json()
            .and_then(|json| serde_json::to_string(&json).ok())
            .map_or(Conversion::Failed, |s| Value::String(s).into())
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }
}

impl ConvertBack for JsonConverter {
    fn convert_back(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        match value {
            Value::String(s) => serde_json::from_str(s)
                .map_or_else(|_| value.clone(), Value::from_json)
                .into(),
            other => other.clone().into(),
        }
    }

    fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
        Some((TypeToken::String, TypeToken::Any))
    }
}

// ---------------------------------------------------------------------------
// DataUrlConverter
// ---------------------------------------------------------------------------

/// Base64 image payload to a `data:` URL (PNG, or SVG when sniffed).
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUrlConverter;

/// Case-insensitive `DOCTYPE\s+svg` over the head of the decoded payload.
fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(100)]).to_ascii_lowercase();
    head.match_indices("doctype").any(|(i, m)| {
        let rest = &head[i + m.len()..];
        let trimmed = rest.trim_start();
        trimmed.len() < rest.len() && trimmed.starts_with("svg")
    })
}

impl ValueConverter for DataUrlConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("base64 to data url", TypeToken::String, TypeToken::String)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| {
            let Value::String(payload) = v else {
                return Conversion::Failed;
            };
            match BASE64.decode(payload.as_bytes()) {
                Ok(bytes) => {
                    let mime = if looks_like_svg(&bytes) {
                        "image/svg+xml"
                    } else {
                        "image/png"
                    };
                    Value::String(format!("data:{mime};base64,{payload}")).into()
                }
                Err(_) => Conversion::Failed,
            }
        })
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }
}

impl ConvertBack for DataUrlConverter {
    fn convert_back(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| {
            let url = v.to_display_string();
            let stripped = match url.find("data:") {
                Some(start) => match url[start..].find(";base64,") {
                    Some(rel) => {
                        let end = start + rel + ";base64,".len();
                        format!("{}{}", &url[..start], &url[end..])
                    }
                    None => url,
                },
                None => url,
            };
            Value::String(stripped).into()
        })
    }

    fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
        Some((TypeToken::String, TypeToken::String))
    }
}

// ---------------------------------------------------------------------------
// StringFormatConverter
// ---------------------------------------------------------------------------

/// Fills `${n}` placeholders in the parameter; `${}` is the whole input.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringFormatConverter;

impl StringFormatConverter {
    fn text(v: &Value) -> String {
        match v {
            Value::Null => String::new(),
            other => other.to_display_string(),
        }
    }

    fn format(parts: Parts, parameter: Option<&str>) -> String {
        let whole = match &parts {
            Parts::List(items) => items.join(","),
            Parts::Single(s) => s.clone(),
        };
        let Some(template) = parameter.filter(|p| !p.is_empty()) else {
            return whole;
        };
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if after[digits..].starts_with('}') {
                let index = &after[..digits];
                // An index past `usize` names no element and expands to nothing.
                if index.is_empty() {
                    out.push_str(&whole);
                } else if let Ok(i) = index.parse::<usize>() {
                    out.push_str(&parts.at(i));
                }
                rest = &after[digits + 1..];
            } else {
                out.push_str("${");
                rest = after;
            }
        }
        out.push_str(rest);
        out
    }
}

enum Parts {
    List(Vec<String>),
    Single(String),
}

impl Parts {
    /// Indexing a single string picks a character.
    fn at(&self, i: usize) -> String {
        match self {
            Self::List(items) => items.get(i).cloned().unwrap_or_default(),
            Self::Single(s) => s.chars().nth(i).map(String::from).unwrap_or_default(),
        }
    }
}

impl ValueConverter for StringFormatConverter {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("format source string", TypeToken::Any, TypeToken::String)
    }

    fn convert(&self, value: &Value, parameter: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        map_scalar(value, |v| {
            Value::String(Self::format(Parts::Single(Self::text(v)), parameter)).into()
        })
    }

    fn as_multi(&self) -> Option<&dyn MultiConvert> {
        Some(self)
    }
}

impl MultiConvert for StringFormatConverter {
    fn multi_convert(
        &self,
        values: &[Value],
        parameter: Option<&str>,
        _: Option<&TypeToken>,
    ) -> Conversion {
        let parts = Parts::List(values.iter().map(Self::text).collect());
        Value::String(Self::format(parts, parameter)).into()
    }

    fn multi_output(&self) -> Option<TypeToken> {
        Some(TypeToken::String)
    }
}

// ---------------------------------------------------------------------------
// DecimalPrecision
// ---------------------------------------------------------------------------

/// Rounds to the number of decimals given by the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalPrecision;

impl ValueConverter for DecimalPrecision {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("number to string", TypeToken::Number, TypeToken::String)
    }

    fn convert(&self, value: &Value, parameter: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        let precision = match parameter.map(|p| Value::from(p).to_number()) {
            Some(p) if p.is_finite() && !parameter.is_some_and(|p| p.trim().is_empty()) => p,
            _ => return Conversion::InvalidParameter,
        };
        let scale = 10f64.powf(precision);
        map_scalar(value, |v| {
            let n = v.to_number();
            let rounded = (n * scale + 0.5).floor() / scale;
            Value::String(Value::Number(rounded).to_display_string()).into()
        })
    }
}

// ---------------------------------------------------------------------------
// ObjectValue
// ---------------------------------------------------------------------------

/// Looks the source value up as a key of the JSON object in the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectValue;

impl ValueConverter for ObjectValue {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("lookup in parameter", TypeToken::String, TypeToken::Any)
    }

    fn convert(&self, value: &Value, parameter: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        let Some(table) = parameter
            .and_then(|p| serde_json::from_str::<serde_json::Value>(p).ok())
            .map(Value::from_json)
        else {
            return Conversion::InvalidParameter;
        };
        let key = value.to_display_string();
        match &table {
            Value::Map(map) => map.get(&key).cloned().unwrap_or_default().into(),
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()
                .into(),
            _ => Value::Null.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScientificNotation
// ---------------------------------------------------------------------------

/// Positive number to `mantissa e exponent` text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScientificNotation;

impl ValueConverter for ScientificNotation {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("number to scientific notation", TypeToken::Number, TypeToken::String)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        let n = value.to_number();
        if !n.is_finite() || n <= 0.0 {
            return Conversion::Failed;
        }
        let exp = n.log10().floor();
        let mantissa = n * 10f64.powf(-exp);
        Value::String(format!(
            "{}e{}",
            Value::Number(mantissa).to_display_string(),
            Value::Number(exp).to_display_string()
        ))
        .into()
    }
}

// ---------------------------------------------------------------------------
// ArrayTranspose
// ---------------------------------------------------------------------------

/// Transposes an array of rows; short rows are padded with `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayTranspose;

impl ArrayTranspose {
    fn transpose(value: &Value) -> Conversion {
        let Value::Array(rows) = value else {
            return Conversion::Failed;
        };
        let mut columns: Vec<&[Value]> = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Value::Array(cells) => columns.push(cells),
                _ => return Conversion::Failed,
            }
        }
        let width = columns.iter().map(|c| c.len()).max().unwrap_or(0);
        let out = (0..width)
            .map(|i| {
                Value::Array(
                    columns
                        .iter()
                        .map(|c| c.get(i).cloned().unwrap_or_default())
                        .collect(),
                )
            })
            .collect();
        Value::Array(out).into()
    }
}

impl ValueConverter for ArrayTranspose {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("transpose", TypeToken::Array, TypeToken::Array)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        Self::transpose(value)
    }

    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        Some(self)
    }
}

impl ConvertBack for ArrayTranspose {
    fn convert_back(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        Self::transpose(value)
    }

    fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
        Some((TypeToken::Array, TypeToken::Array))
    }
}

// ---------------------------------------------------------------------------
// ObjectPluck
// ---------------------------------------------------------------------------

/// Replaces every entry of a map or array with the value at a sub-path.
///
/// The parameter is the comma-separated body of a JSON array, e.g.
/// `"address", "city"` or `0`. Missing sub-paths pluck `Null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectPluck;

impl ObjectPluck {
    fn parse_path(parameter: &str) -> Option<Vec<PathSegment>> {
        let items: Vec<serde_json::Value> = serde_json::from_str(&format!("[{parameter}]")).ok()?;
        Some(
            items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(key) => PathSegment::Key(key),
                    serde_json::Value::Number(n) => match n.as_u64() {
                        Some(i) => usize::try_from(i)
                            .map_or_else(|_| PathSegment::Key(n.to_string()), PathSegment::Index),
                        None => PathSegment::Key(n.to_string()),
                    },
                    other => PathSegment::Key(Value::from_json(other).to_display_string()),
                })
                .collect(),
        )
    }

    fn pluck(entry: &Value, path: &[PathSegment]) -> Value {
        path.iter()
            .try_fold(entry.clone(), |current, segment| current.get_segment(segment))
            .unwrap_or_default()
    }
}

impl ValueConverter for ObjectPluck {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("pluck from every entry", TypeToken::Any, TypeToken::Any)
    }

    fn convert(&self, value: &Value, parameter: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        let Some(parameter) = parameter else {
            return value.clone().into();
        };
        let Some(path) = Self::parse_path(parameter) else {
            return Conversion::Failed;
        };
        match value {
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, entry)| (k.clone(), Self::pluck(entry, &path)))
                    .collect(),
            )
            .into(),
            Value::Array(items) => {
                Value::Array(items.iter().map(|entry| Self::pluck(entry, &path)).collect()).into()
            }
            other => other.clone().into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TraverseObject
// ---------------------------------------------------------------------------

/// Parses every string leaf of nested maps and arrays as JSON.
///
/// Any leaf that is not valid JSON fails the whole conversion. Top-level
/// scalars and live objects are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraverseObject;

impl TraverseObject {
    fn traverse(value: &Value) -> Option<Value> {
        Some(match value {
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Self::leaf(v).map(|v| (k.clone(), v)))
                    .collect::<Option<_>>()?,
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(Self::leaf).collect::<Option<_>>()?)
            }
            other => other.clone(),
        })
    }

    fn leaf(value: &Value) -> Option<Value> {
        match value {
            Value::String(text) => serde_json::from_str(text).ok().map(Value::from_json),
            other => Self::traverse(other),
        }
    }
}

impl ValueConverter for TraverseObject {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("parse nested json strings", TypeToken::Any, TypeToken::Any)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        Self::traverse(value).map_or(Conversion::Failed, Conversion::Value)
    }

    fn as_multi(&self) -> Option<&dyn MultiConvert> {
        Some(self)
    }
}

impl MultiConvert for TraverseObject {
    fn multi_convert(&self, values: &[Value], _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        Self::traverse(&Value::Array(values.to_vec())).map_or(Conversion::Failed, Conversion::Value)
    }
}
