#![forbid(unsafe_code)]

//! Live bindings from source properties to one target property.
//!
//! A [`Binding`] resolves a value from its source(s), runs it through a
//! converter and pushes the result into the callback installed by the
//! property it is attached to. Three shapes exist, plus the unresolved
//! template form used inside template fragments:
//!
//! - element: a path rooted at a source object key
//! - bidirectional element: the same, plus [`Bidirectional::update_source`]
//! - multi: ordered sub-bindings combined into one value
//!
//! # State machine
//!
//! ```text
//!   unattached --attach--> attached --detach--> unattached
//! ```
//!
//! Attachment is exclusive: attaching an attached binding fails with
//! [`BindingError::AlreadyAttached`] naming the current owner.
//!
//! # Invariants
//!
//! 1. `exec` on an unattached binding does nothing and returns `false`.
//! 2. A failed conversion is logged and never pushed.
//! 3. Element bindings subscribe to the property-changed channel once, at
//!    construction; the subscription dies with the binding.
//! 4. The attachment callback is cloned out of its cell before it runs, so a
//!    callback may detach or re-attach the binding.

mod element;
mod multi;

pub use element::ElementBinding;
pub use multi::MultiBinding;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::convert::{Conversion, ConverterKey, ValueConverter};
use crate::error::BindingError;
use crate::object::{ObjectKey, ObjectRef};
use crate::runtime::Runtime;
use crate::value::{PathSegment, TypeToken, Value};

/// Shared handle to a binding.
pub type BindingRef = Rc<Binding>;

/// Callback installed by the owning property.
pub type OnChanged = Rc<dyn Fn(Value)>;

/// Concrete shape of a binding; also its serialized type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Element,
    BidirectionalElement,
    Multi,
    ElementTemplate,
    BidirectionalElementTemplate,
}

impl BindingKind {
    pub const ALL: [BindingKind; 5] = [
        Self::Element,
        Self::BidirectionalElement,
        Self::Multi,
        Self::ElementTemplate,
        Self::BidirectionalElementTemplate,
    ];

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Element => "ElementBinding",
            Self::BidirectionalElement => "BidirectionalElementBinding",
            Self::Multi => "MultiBinding",
            Self::ElementTemplate => "ElementBindingTemplate",
            Self::BidirectionalElementTemplate => "BidirectionalElementBindingTemplate",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    #[must_use]
    pub fn is_template(self) -> bool {
        matches!(
            self,
            Self::ElementTemplate | Self::BidirectionalElementTemplate
        )
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Converter selection shared by every binding shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOptions {
    /// `None` pushes values verbatim.
    pub converter: Option<ConverterKey>,
    pub parameter: Option<String>,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            converter: Some(ConverterKey::default_converter()),
            parameter: None,
        }
    }
}

impl BindingOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn converter(mut self, key: ConverterKey) -> Self {
        self.converter = Some(key);
        self
    }

    #[must_use]
    pub fn no_converter(mut self) -> Self {
        self.converter = None;
        self
    }

    #[must_use]
    pub fn parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }
}

struct Attachment {
    owner: String,
    on_changed: OnChanged,
}

/// State every binding shape carries.
pub(crate) struct BindingCore {
    pub(crate) runtime: Rc<Runtime>,
    pub(crate) converter: Option<ConverterKey>,
    pub(crate) parameter: Option<String>,
    attachment: RefCell<Option<Attachment>>,
    target_type: RefCell<Option<TypeToken>>,
}

impl BindingCore {
    fn new(runtime: &Rc<Runtime>, options: BindingOptions) -> Self {
        Self {
            runtime: Rc::clone(runtime),
            converter: options.converter,
            parameter: options.parameter,
            attachment: RefCell::new(None),
            target_type: RefCell::new(None),
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attachment.borrow().is_some()
    }

    pub(crate) fn owner(&self) -> Option<String> {
        self.attachment.borrow().as_ref().map(|a| a.owner.clone())
    }

    pub(crate) fn target_type(&self) -> Option<TypeToken> {
        self.target_type.borrow().clone()
    }

    /// The configured converter. An unregistered key logs and yields `None`.
    pub(crate) fn resolve_converter(&self) -> Option<Rc<dyn ValueConverter>> {
        let key = self.converter.as_ref()?;
        let found = self.runtime.converters().get(key);
        if found.is_none() {
            tracing::warn!(converter = %key, "converter not registered; value passed through");
        }
        found
    }

    fn push(&self, value: Value) -> bool {
        let callback = self
            .attachment
            .borrow()
            .as_ref()
            .map(|a| Rc::clone(&a.on_changed));
        match callback {
            Some(on_changed) => {
                on_changed(value);
                true
            }
            None => false,
        }
    }

    /// Push a conversion result, logging failures instead of pushing.
    pub(crate) fn deliver(&self, kind: BindingKind, conversion: Conversion) -> bool {
        match conversion {
            Conversion::Value(v) => self.push(v),
            Conversion::Failed => {
                tracing::warn!(
                    binding = %kind,
                    owner = %self.owner().unwrap_or_default(),
                    converter = ?self.converter.as_ref().map(ConverterKey::as_str),
                    "conversion failed; target not updated"
                );
                false
            }
            Conversion::InvalidParameter => {
                tracing::warn!(
                    binding = %kind,
                    owner = %self.owner().unwrap_or_default(),
                    converter = ?self.converter.as_ref().map(ConverterKey::as_str),
                    parameter = ?self.parameter,
                    "invalid converter parameter; target not updated"
                );
                false
            }
        }
    }

    /// Run `value` through the converter (verbatim without one) and push it.
    pub(crate) fn convert_and_push(&self, kind: BindingKind, value: Value) -> bool {
        if !self.is_attached() {
            return false;
        }
        let conversion = match self.resolve_converter() {
            Some(c) => c.convert(&value, self.parameter.as_deref(), self.target_type().as_ref()),
            None => Conversion::Value(value),
        };
        self.deliver(kind, conversion)
    }
}

pub(crate) enum BindingVariant {
    Element(ElementBinding),
    BidirectionalElement(ElementBinding),
    Multi(MultiBinding),
    Template {
        bidirectional: bool,
        path: Vec<PathSegment>,
    },
}

/// A live binding of any shape.
pub struct Binding {
    this: Weak<Binding>,
    pub(crate) core: BindingCore,
    pub(crate) variant: BindingVariant,
}

impl Binding {
    /// One-way binding to `path` under the object keyed `source`.
    pub fn element(
        runtime: &Rc<Runtime>,
        source: impl Into<ObjectKey>,
        path: Vec<PathSegment>,
        options: BindingOptions,
    ) -> BindingRef {
        Self::path_binding(runtime, Some(source.into()), path, options, false)
    }

    /// Two-way binding to `path` under the object keyed `source`.
    pub fn bidirectional(
        runtime: &Rc<Runtime>,
        source: impl Into<ObjectKey>,
        path: Vec<PathSegment>,
        options: BindingOptions,
    ) -> BindingRef {
        Self::path_binding(runtime, Some(source.into()), path, options, true)
    }

    pub(crate) fn path_binding(
        runtime: &Rc<Runtime>,
        source: Option<ObjectKey>,
        path: Vec<PathSegment>,
        options: BindingOptions,
        bidirectional: bool,
    ) -> BindingRef {
        Rc::new_cyclic(|this: &Weak<Binding>| {
            let element = ElementBinding::new(runtime, this.clone(), source, path);
            Self {
                this: this.clone(),
                core: BindingCore::new(runtime, options),
                variant: if bidirectional {
                    BindingVariant::BidirectionalElement(element)
                } else {
                    BindingVariant::Element(element)
                },
            }
        })
    }

    /// Binding combining `sources`; fails if any source is already attached.
    pub fn multi(
        runtime: &Rc<Runtime>,
        sources: Vec<BindingRef>,
        options: BindingOptions,
    ) -> Result<BindingRef, BindingError> {
        let binding = Rc::new_cyclic(|this: &Weak<Binding>| Self {
            this: this.clone(),
            core: BindingCore::new(runtime, options),
            variant: BindingVariant::Multi(MultiBinding::new()),
        });
        if let Some(multi) = binding.as_multi() {
            multi.set_sources(sources)?;
        }
        Ok(binding)
    }

    /// Unresolved template; compiled into an element binding on load.
    pub fn template(
        runtime: &Rc<Runtime>,
        path: Vec<PathSegment>,
        bidirectional: bool,
        options: BindingOptions,
    ) -> BindingRef {
        Rc::new_cyclic(|this: &Weak<Binding>| Self {
            this: this.clone(),
            core: BindingCore::new(runtime, options),
            variant: BindingVariant::Template {
                bidirectional,
                path,
            },
        })
    }

    #[must_use]
    pub fn kind(&self) -> BindingKind {
        match &self.variant {
            BindingVariant::Element(_) => BindingKind::Element,
            BindingVariant::BidirectionalElement(_) => BindingKind::BidirectionalElement,
            BindingVariant::Multi(_) => BindingKind::Multi,
            BindingVariant::Template {
                bidirectional: false,
                ..
            } => BindingKind::ElementTemplate,
            BindingVariant::Template {
                bidirectional: true,
                ..
            } => BindingKind::BidirectionalElementTemplate,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.core.runtime
    }

    #[must_use]
    pub fn converter(&self) -> Option<&ConverterKey> {
        self.core.converter.as_ref()
    }

    #[must_use]
    pub fn converter_parameter(&self) -> Option<&str> {
        self.core.parameter.as_deref()
    }

    /// Source key of an element binding.
    #[must_use]
    pub fn source_key(&self) -> Option<&ObjectKey> {
        match &self.variant {
            BindingVariant::Element(e) | BindingVariant::BidirectionalElement(e) => {
                e.source_key.as_ref()
            }
            _ => None,
        }
    }

    /// Path of an element or template binding.
    #[must_use]
    pub fn path(&self) -> Option<&[PathSegment]> {
        match &self.variant {
            BindingVariant::Element(e) | BindingVariant::BidirectionalElement(e) => Some(&e.path),
            BindingVariant::Template { path, .. } => Some(path),
            BindingVariant::Multi(_) => None,
        }
    }

    /// The current owner label, if attached.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.core.owner()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.core.is_attached()
    }

    /// Install the target callback. Fails if another owner holds it.
    pub fn attach(&self, owner: impl Into<String>, on_changed: OnChanged) -> Result<(), BindingError> {
        let mut slot = self.core.attachment.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Err(BindingError::AlreadyAttached {
                owner: existing.owner.clone(),
            });
        }
        *slot = Some(Attachment {
            owner: owner.into(),
            on_changed,
        });
        Ok(())
    }

    /// Remove the target callback and the expected target type.
    pub fn detach(&self) {
        self.core.attachment.borrow_mut().take();
        self.core.target_type.borrow_mut().take();
    }

    #[must_use]
    pub fn target_type(&self) -> Option<TypeToken> {
        self.core.target_type()
    }

    pub fn set_target_type(&self, ty: Option<TypeToken>) {
        *self.core.target_type.borrow_mut() = ty;
    }

    /// Resolve and push the current value. Returns whether it was pushed.
    pub fn exec(&self) -> bool {
        match &self.variant {
            BindingVariant::Element(e) => e.exec(&self.core, BindingKind::Element, None),
            BindingVariant::BidirectionalElement(e) => {
                e.exec(&self.core, BindingKind::BidirectionalElement, None)
            }
            BindingVariant::Multi(m) => m.exec(&self.core),
            BindingVariant::Template { .. } => false,
        }
    }

    /// The write-back capability of a bidirectional element binding.
    #[must_use]
    pub fn as_bidirectional(&self) -> Option<Bidirectional<'_>> {
        match &self.variant {
            BindingVariant::BidirectionalElement(element) => Some(Bidirectional {
                core: &self.core,
                element,
            }),
            _ => None,
        }
    }

    /// The multi-source view of a multi-binding.
    #[must_use]
    pub fn as_multi(&self) -> Option<Multi<'_>> {
        match &self.variant {
            BindingVariant::Multi(multi) => Some(Multi {
                this: &self.this,
                multi,
            }),
            _ => None,
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let BindingVariant::Multi(m) = &self.variant {
            m.release_sources();
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("kind", &self.kind())
            .field("converter", &self.core.converter)
            .field("parameter", &self.core.parameter)
            .field("source_key", &self.source_key())
            .field("path", &self.path())
            .field("owner", &self.core.owner())
            .finish()
    }
}

/// Write-back handle of a bidirectional binding.
pub struct Bidirectional<'a> {
    core: &'a BindingCore,
    element: &'a ElementBinding,
}

impl Bidirectional<'_> {
    /// Write a target-side value back into the source.
    ///
    /// Returns whether the write happened.
    pub fn update_source(&self, target_value: &Value) -> bool {
        self.element.update_source(self.core, target_value)
    }
}

/// Multi-source handle of a multi-binding.
pub struct Multi<'a> {
    this: &'a Weak<Binding>,
    multi: &'a MultiBinding,
}

impl Multi<'_> {
    /// Replace the sub-bindings. Fails, changing nothing, if any candidate
    /// is already attached elsewhere.
    pub fn set_sources(&self, sources: Vec<BindingRef>) -> Result<(), BindingError> {
        self.multi.set_sources(self.this, sources)
    }

    #[must_use]
    pub fn sources(&self) -> Vec<BindingRef> {
        self.multi.sources()
    }

    /// Last value received from each sub-binding, in source order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.multi.values()
    }
}

impl From<&ObjectRef> for ObjectKey {
    fn from(object: &ObjectRef) -> Self {
        object.key()
    }
}

impl From<&ObjectKey> for ObjectKey {
    fn from(key: &ObjectKey) -> Self {
        key.clone()
    }
}
