#![forbid(unsafe_code)]

//! Type-tag registry for polymorphic serialization.
//!
//! Maps a stable string tag (the `__type__` field of the serialized form) to a
//! [`TypeRegistration`] carrying the decoder for that type, and back from a
//! type identity to its tag.
//!
//! # Invariants
//!
//! 1. A tag names exactly one type identity for the lifetime of the registry.
//! 2. Entries are never removed.
//! 3. [`TypeRegistry::ensure`] is idempotent for the identity that owns the
//!    tag; [`TypeRegistry::register`] is not.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{RegistryError, SerializeError};
use crate::serialize::{Decoded, Deserializer, JsonMap};

/// Decoder invoked for a tagged JSON object. The map has `__type__` removed.
pub type DecodeFn = Rc<dyn Fn(&mut Deserializer<'_>, JsonMap) -> Result<Decoded, SerializeError>>;

/// What a tag refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeIdentity {
    /// A type implemented by this crate.
    Builtin(&'static str),
    /// A bindable object type declared at runtime in the metadata store.
    Declared(String),
    /// An event type, plain or registered by the host.
    Event(String),
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(name) => f.write_str(name),
            Self::Declared(name) | Self::Event(name) => f.write_str(name),
        }
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct TypeRegistration {
    pub tag: String,
    pub identity: TypeIdentity,
    pub deserialize: DecodeFn,
}

impl TypeRegistration {
    pub fn new(
        tag: impl Into<String>,
        identity: TypeIdentity,
        deserialize: impl Fn(&mut Deserializer<'_>, JsonMap) -> Result<Decoded, SerializeError>
        + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            identity,
            deserialize: Rc::new(deserialize),
        }
    }
}

impl fmt::Debug for TypeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("tag", &self.tag)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Tag ⇄ type table owned by a [`Runtime`](crate::runtime::Runtime).
#[derive(Default)]
pub struct TypeRegistry {
    by_tag: RefCell<BTreeMap<String, TypeRegistration>>,
    by_identity: RefCell<BTreeMap<TypeIdentity, String>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tag. Fails if the tag is already taken.
    pub fn register(&self, registration: TypeRegistration) -> Result<(), RegistryError> {
        if self.by_tag.borrow().contains_key(&registration.tag) {
            return Err(RegistryError::DuplicateTag(registration.tag));
        }
        self.insert(registration);
        Ok(())
    }

    /// Register unless the same identity already owns the tag.
    ///
    /// This is the lazy path taken on first serialization.
    pub fn ensure(&self, registration: TypeRegistration) -> Result<(), RegistryError> {
        let existing = self
            .by_tag
            .borrow()
            .get(&registration.tag)
            .map(|r| r.identity.clone());
        match existing {
            Some(identity) if identity == registration.identity => Ok(()),
            Some(_) => Err(RegistryError::DuplicateTag(registration.tag)),
            None => {
                self.insert(registration);
                Ok(())
            }
        }
    }

    fn insert(&self, registration: TypeRegistration) {
        tracing::trace!(tag = %registration.tag, identity = %registration.identity, "type registered");
        self.by_identity
            .borrow_mut()
            .insert(registration.identity.clone(), registration.tag.clone());
        self.by_tag
            .borrow_mut()
            .insert(registration.tag.clone(), registration);
    }

    #[must_use]
    pub fn lookup(&self, tag: &str) -> Option<TypeRegistration> {
        self.by_tag.borrow().get(tag).cloned()
    }

    /// Like [`lookup`](Self::lookup) but with an error for the miss.
    pub fn require(&self, tag: &str) -> Result<TypeRegistration, RegistryError> {
        self.lookup(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.borrow().contains_key(tag)
    }

    /// Reverse lookup from a type identity to its tag.
    #[must_use]
    pub fn tag_of(&self, identity: &TypeIdentity) -> Option<String> {
        self.by_identity.borrow().get(identity).cloned()
    }

    /// All registered tags in sorted order.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.by_tag.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn reg(tag: &str, identity: TypeIdentity) -> TypeRegistration {
        TypeRegistration::new(tag, identity, |_, _| Ok(Decoded::Value(Value::Null)))
    }

    #[test]
    fn register_twice_fails() {
        let r = TypeRegistry::new();
        r.register(reg("Thing", TypeIdentity::Builtin("Thing")))
            .unwrap();
        let err = r
            .register(reg("Thing", TypeIdentity::Builtin("Thing")))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTag("Thing".into()));
    }

    #[test]
    fn ensure_is_idempotent_for_owner() {
        let r = TypeRegistry::new();
        let id = TypeIdentity::Declared("Button".into());
        r.ensure(reg("Button", id.clone())).unwrap();
        r.ensure(reg("Button", id.clone())).unwrap();
        assert_eq!(r.tag_of(&id).as_deref(), Some("Button"));
        assert!(
            r.ensure(reg("Button", TypeIdentity::Builtin("Other")))
                .is_err()
        );
    }

    #[test]
    fn require_reports_unknown_tag() {
        let r = TypeRegistry::new();
        assert_eq!(
            r.require("Nope").unwrap_err(),
            RegistryError::UnknownTag("Nope".into())
        );
        assert!(!r.contains("Nope"));
    }
}
