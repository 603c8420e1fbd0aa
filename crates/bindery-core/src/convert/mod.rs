#![forbid(unsafe_code)]

//! Named value converters used by bindings.
//!
//! A converter is a stateless transformation registered once under a
//! [`ConverterKey`]. Every converter implements [`ValueConverter::convert`];
//! the inverse ([`ConvertBack`]) and the multi-source combiner
//! ([`MultiConvert`]) are optional capabilities, exposed through
//! `as_bidirectional` / `as_multi` rather than probed for at runtime.
//!
//! # Failure sentinels
//!
//! A conversion yields [`Conversion::Failed`] when the current input cannot be
//! converted (a later input may succeed) and [`Conversion::InvalidParameter`]
//! when the parameter can never work for this converter. Bindings treat both
//! as "do not push".

pub mod builtin;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::ConverterError;
use crate::value::{TypeToken, Value};

/// Key of the converter used when a binding does not name one.
pub const DEFAULT_CONVERTER: &str = "DefaultConverter";

/// Non-empty name of a registered converter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConverterKey(String);

impl ConverterKey {
    pub fn new(name: impl Into<String>) -> Result<Self, ConverterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConverterError::InvalidKey(name));
        }
        Ok(Self(name))
    }

    /// Key of [`builtin::DefaultConverter`].
    #[must_use]
    pub fn default_converter() -> Self {
        Self(DEFAULT_CONVERTER.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConverterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConverterKey {
    type Error = ConverterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ConverterKey {
    type Error = ConverterError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConverterKey> for String {
    fn from(key: ConverterKey) -> Self {
        key.0
    }
}

/// Outcome of one conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Value(Value),
    /// The input is currently unconvertible.
    Failed,
    /// The parameter is invalid regardless of input.
    InvalidParameter,
}

impl Conversion {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Failed | Self::InvalidParameter => None,
        }
    }
}

impl From<Value> for Conversion {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Editor-facing description and declared endpoints of a converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterInfo {
    pub desc: String,
    pub from: TypeToken,
    pub to: TypeToken,
}

impl ConverterInfo {
    pub fn new(desc: impl Into<String>, from: TypeToken, to: TypeToken) -> Self {
        Self {
            desc: desc.into(),
            from,
            to,
        }
    }
}

/// A named, stateless transformation between source and target values.
pub trait ValueConverter {
    fn info(&self) -> ConverterInfo;

    /// Convert a source value for the target.
    ///
    /// `target` is the expected type of the receiving property, when known.
    fn convert(&self, value: &Value, parameter: Option<&str>, target: Option<&TypeToken>)
    -> Conversion;

    /// The inverse, if this converter supports two-way bindings.
    fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
        None
    }

    /// The multi-source combiner, if this converter has one.
    fn as_multi(&self) -> Option<&dyn MultiConvert> {
        None
    }
}

/// Inverse of [`ValueConverter::convert`].
pub trait ConvertBack {
    fn convert_back(
        &self,
        value: &Value,
        parameter: Option<&str>,
        target: Option<&TypeToken>,
    ) -> Conversion;

    /// Declared `(from, to)` of the inverse, checked at registration.
    fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
        None
    }
}

/// Combines the ordered values of a multi-binding.
pub trait MultiConvert {
    fn multi_convert(
        &self,
        values: &[Value],
        parameter: Option<&str>,
        target: Option<&TypeToken>,
    ) -> Conversion;

    /// Declared output type, checked against `convert`'s at registration.
    fn multi_output(&self) -> Option<TypeToken> {
        None
    }
}

/// Apply a scalar conversion element-wise through arrays and maps.
///
/// Any element failure fails the whole conversion.
pub fn map_scalar(value: &Value, f: impl Fn(&Value) -> Conversion) -> Conversion {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match f(item) {
                    Conversion::Value(v) => out.push(v),
                    failure => return failure,
                }
            }
            Conversion::Value(Value::Array(out))
        }
        Value::Map(map) => {
            let mut out = BTreeMap::new();
            for (k, item) in map {
                match f(item) {
                    Conversion::Value(v) => {
                        out.insert(k.clone(), v);
                    }
                    failure => return failure,
                }
            }
            Conversion::Value(Value::Map(out))
        }
        scalar => f(scalar),
    }
}

/// Registry of converter singletons keyed by name.
pub struct ConverterRegistry {
    converters: RefCell<BTreeMap<ConverterKey, Rc<dyn ValueConverter>>>,
    check_signatures: Cell<bool>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self {
            converters: RefCell::default(),
            check_signatures: Cell::new(true),
        }
    }
}

impl ConverterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the registration-time signature check.
    pub fn set_check_signatures(&self, enabled: bool) {
        self.check_signatures.set(enabled);
    }

    /// Register a converter. Fails when the key is taken or, with checks on,
    /// when a declared capability signature disagrees with `info()`.
    pub fn register(
        &self,
        key: ConverterKey,
        converter: impl ValueConverter + 'static,
    ) -> Result<(), ConverterError> {
        self.register_rc(key, Rc::new(converter))
    }

    pub fn register_rc(
        &self,
        key: ConverterKey,
        converter: Rc<dyn ValueConverter>,
    ) -> Result<(), ConverterError> {
        if self.converters.borrow().contains_key(&key) {
            return Err(ConverterError::AlreadyRegistered(key));
        }
        if self.check_signatures.get() {
            check_signature(&key, converter.as_ref())?;
        }
        tracing::trace!(converter = %key, "converter registered");
        self.converters.borrow_mut().insert(key, converter);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &ConverterKey) -> Option<Rc<dyn ValueConverter>> {
        self.converters.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ConverterKey) -> bool {
        self.converters.borrow().contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ConverterKey> {
        self.converters.borrow().keys().cloned().collect()
    }

    /// Info of every registered converter, for editor listings.
    #[must_use]
    pub fn infos(&self) -> Vec<(ConverterKey, ConverterInfo)> {
        self.converters
            .borrow()
            .iter()
            .map(|(k, c)| (k.clone(), c.info()))
            .collect()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("keys", &self.keys())
            .field("check_signatures", &self.check_signatures.get())
            .finish()
    }
}

fn check_signature(key: &ConverterKey, converter: &dyn ValueConverter) -> Result<(), ConverterError> {
    let info = converter.info();
    if let Some(multi) = converter.as_multi()
        && let Some(out) = multi.multi_output()
        && !out.compatible(&info.to)
    {
        return Err(ConverterError::SignatureMismatch {
            key: key.clone(),
            detail: format!(
                "multi_convert(.. => {out}) does not match convert({} => {})",
                info.from, info.to
            ),
        });
    }
    if let Some(back) = converter.as_bidirectional()
        && let Some((from, to)) = back.back_signature()
        && !(from.compatible(&info.to) && to.compatible(&info.from))
    {
        return Err(ConverterError::SignatureMismatch {
            key: key.clone(),
            detail: format!(
                "convert({} => {}) does not match convert_back({from} => {to})",
                info.from, info.to
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl ValueConverter for Upper {
        fn info(&self) -> ConverterInfo {
            ConverterInfo::new("upper-case", TypeToken::String, TypeToken::String)
        }

        fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
            map_scalar(value, |v| match v {
                Value::String(s) => Value::String(s.to_uppercase()).into(),
                _ => Conversion::Failed,
            })
        }
    }

    struct Lying;

    impl ValueConverter for Lying {
        fn info(&self) -> ConverterInfo {
            ConverterInfo::new("lies", TypeToken::String, TypeToken::Number)
        }

        fn convert(&self, _: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
            Conversion::Failed
        }

        fn as_bidirectional(&self) -> Option<&dyn ConvertBack> {
            Some(self)
        }
    }

    impl ConvertBack for Lying {
        fn convert_back(&self, _: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
            Conversion::Failed
        }

        fn back_signature(&self) -> Option<(TypeToken, TypeToken)> {
            Some((TypeToken::Bool, TypeToken::String))
        }
    }

    #[test]
    fn key_rejects_empty() {
        assert_eq!(
            ConverterKey::new("").unwrap_err(),
            ConverterError::InvalidKey(String::new())
        );
        assert!(serde_json::from_str::<ConverterKey>("\"\"").is_err());
        let k: ConverterKey = serde_json::from_str("\"Upper\"").unwrap();
        assert_eq!(k.as_str(), "Upper");
    }

    #[test]
    fn duplicate_registration_fails() {
        let reg = ConverterRegistry::new();
        let key = ConverterKey::new("Upper").unwrap();
        reg.register(key.clone(), Upper).unwrap();
        assert_eq!(
            reg.register(key.clone(), Upper).unwrap_err(),
            ConverterError::AlreadyRegistered(key)
        );
    }

    #[test]
    fn signature_check_can_be_disabled() {
        let reg = ConverterRegistry::new();
        let key = ConverterKey::new("Lying").unwrap();
        assert!(matches!(
            reg.register(key.clone(), Lying),
            Err(ConverterError::SignatureMismatch { .. })
        ));
        reg.set_check_signatures(false);
        reg.register(key.clone(), Lying).unwrap();
        assert!(reg.get(&key).unwrap().as_bidirectional().is_some());
    }

    #[test]
    fn scalar_mapping_fails_as_a_whole() {
        let ok = Upper.convert(
            &Value::Array(vec!["a".into(), "b".into()]),
            None,
            None,
        );
        assert_eq!(
            ok,
            Conversion::Value(Value::Array(vec!["A".into(), "B".into()]))
        );
        let bad = Upper.convert(&Value::Array(vec!["a".into(), 1.into()]), None, None);
        assert_eq!(bad, Conversion::Failed);
    }
}
