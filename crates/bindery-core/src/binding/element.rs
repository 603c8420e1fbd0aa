#![forbid(unsafe_code)]

//! Path bindings rooted at a source object.
//!
//! The binding walks its path from the source, segment by segment. Each
//! segment that lands on a bindable object records that object's key, so a
//! later property change anywhere along the chain can be matched without
//! walking again.
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Source key does not resolve | `exec` returns `false`, nothing pushed |
//! | Missing segment, or null before the last segment | `exec` returns `false` |
//! | Last segment holds `null` | `null` is pushed |
//! | Write-back through a one-way converter | `error!`, source untouched |

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{Binding, BindingCore, BindingKind};
use crate::convert::Conversion;
use crate::messaging::{PropertyChanged, Subscription};
use crate::object::{ObjectKey, ObjectRef};
use crate::runtime::Runtime;
use crate::value::{PathSegment, Value, display_path};

pub struct ElementBinding {
    pub(crate) source_key: Option<ObjectKey>,
    pub(crate) path: Vec<PathSegment>,
    /// Key of the object reached at each segment, `None` where the value
    /// was not an object.
    segments: RefCell<Vec<Option<ObjectKey>>>,
    _subscription: Subscription,
}

impl ElementBinding {
    pub(super) fn new(
        runtime: &Rc<Runtime>,
        binding: Weak<Binding>,
        source_key: Option<ObjectKey>,
        path: Vec<PathSegment>,
    ) -> Self {
        let subscription = runtime
            .bus()
            .property_changed()
            .subscribe(move |msg: &PropertyChanged| {
                if let Some(binding) = binding.upgrade() {
                    binding.on_property_changed(msg);
                }
            });
        Self {
            source_key,
            segments: RefCell::new(vec![None; path.len()]),
            path,
            _subscription: subscription,
        }
    }

    fn resolve_source(&self, core: &BindingCore) -> Option<ObjectRef> {
        let key = self.source_key.as_ref()?;
        core.runtime.resolve(key)
    }

    /// Walk the path from `source` (or the resolved source key) and push.
    pub(super) fn exec(
        &self,
        core: &BindingCore,
        kind: BindingKind,
        source: Option<ObjectRef>,
    ) -> bool {
        if !core.is_attached() {
            return false;
        }
        let Some(source) = source.or_else(|| self.resolve_source(core)) else {
            tracing::debug!(
                binding = %kind,
                source_key = ?self.source_key,
                "binding source not resolved"
            );
            return false;
        };

        let mut keys = vec![None; self.path.len()];
        let mut current = Value::Object(source);
        let last = self.path.len().saturating_sub(1);
        let mut complete = true;
        for (i, segment) in self.path.iter().enumerate() {
            match current.get_segment(segment) {
                Some(Value::Null) if i < last => {
                    complete = false;
                    break;
                }
                Some(next) => {
                    if let Value::Object(object) = &next {
                        keys[i] = Some(object.key());
                    }
                    current = next;
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        *self.segments.borrow_mut() = keys;

        if !complete {
            tracing::trace!(
                binding = %kind,
                path = %display_path(&self.path),
                "binding path incomplete"
            );
            return false;
        }
        core.convert_and_push(kind, current)
    }

    /// React to a change on one object of the chain.
    pub(super) fn on_property_changed(
        &self,
        core: &BindingCore,
        kind: BindingKind,
        msg: &PropertyChanged,
    ) {
        let Some(source_key) = self.source_key.as_ref() else {
            return;
        };
        if self.path.is_empty() || !core.is_attached() {
            return;
        }
        let sender = msg.sender.key();
        let segments = self.segments.borrow().clone();
        let mut owner = Some(source_key);
        for (i, segment) in self.path.iter().enumerate() {
            if owner == Some(&sender) && segment.is_key(&msg.property) {
                let source = (sender == *source_key).then(|| Rc::clone(&msg.sender));
                self.exec(core, kind, source);
                return;
            }
            owner = segments.get(i).and_then(Option::as_ref);
        }
    }

    /// Write `target_value` back along the path.
    ///
    /// The value goes through the converter's inverse, then lands either on
    /// the nearest bindable object via `update` or, when the tail of the
    /// path is plain data, into a rebuilt copy of that data.
    pub(super) fn update_source(&self, core: &BindingCore, target_value: &Value) -> bool {
        let Some((last, prefix)) = self.path.split_last() else {
            return false;
        };
        let Some(source) = self.resolve_source(core) else {
            tracing::debug!(source_key = ?self.source_key, "write-back source not resolved");
            return false;
        };

        let mut current = Value::Object(Rc::clone(&source));
        let mut owner = source;
        let mut owner_depth = 0;
        for (i, segment) in prefix.iter().enumerate() {
            match current.get_segment(segment) {
                Some(Value::Null) | None => return false,
                Some(next) => {
                    if let Value::Object(object) = &next {
                        owner = Rc::clone(object);
                        owner_depth = i + 1;
                    }
                    current = next;
                }
            }
        }

        let source_value = match core.resolve_converter() {
            Some(converter) => match converter.as_bidirectional() {
                Some(back) => {
                    back.convert_back(target_value, core.parameter.as_deref(), None)
                }
                None => {
                    tracing::error!(
                        converter = ?core.converter.as_ref().map(|k| k.as_str()),
                        path = %display_path(&self.path),
                        "converter has no inverse; source not updated"
                    );
                    return false;
                }
            },
            None => Conversion::Value(target_value.clone()),
        };
        let Some(source_value) = source_value.into_value() else {
            tracing::warn!(
                path = %display_path(&self.path),
                "inverse conversion failed; source not updated"
            );
            return false;
        };

        let result = match &current {
            Value::Object(container) => {
                let PathSegment::Key(key) = last else {
                    return false;
                };
                container.update(key, source_value)
            }
            _ => {
                let PathSegment::Key(key) = &self.path[owner_depth] else {
                    return false;
                };
                let mut whole = owner.get(key).unwrap_or_default();
                if !whole.set_path(&self.path[owner_depth + 1..], source_value) {
                    tracing::warn!(
                        path = %display_path(&self.path),
                        "write-back path does not fit the source data; source not updated"
                    );
                    return false;
                }
                owner.update(key, whole)
            }
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, path = %display_path(&self.path), "write-back rejected");
                false
            }
        }
    }
}

impl Binding {
    fn on_property_changed(&self, msg: &PropertyChanged) {
        let kind = self.kind();
        match &self.variant {
            super::BindingVariant::Element(e) | super::BindingVariant::BidirectionalElement(e) => {
                e.on_property_changed(&self.core, kind, msg);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BindingOptions, BindingRef};
    use super::*;
    use crate::convert::ConverterKey;
    use crate::metadata::{PropertyDescriptor, TypeDeclaration};
    use crate::runtime::{ObjectStore, RuntimeConfig};
    use crate::value::{TypeToken, path};
    use std::cell::RefCell;

    fn setup() -> (Rc<Runtime>, Rc<ObjectStore>) {
        let rt = Runtime::new(RuntimeConfig::default());
        let store = rt.install_store();
        TypeDeclaration::new("Node")
            .property(PropertyDescriptor::new("text", TypeToken::String))
            .property(PropertyDescriptor::new("count", TypeToken::Number))
            .property(PropertyDescriptor::new("data", TypeToken::Any))
            .property(PropertyDescriptor::new("child", TypeToken::Any))
            .declare(&rt)
            .unwrap();
        (rt, store)
    }

    fn node(rt: &Rc<Runtime>, store: &ObjectStore) -> ObjectRef {
        let n = rt.create("Node").unwrap();
        store.insert(&n);
        n
    }

    fn capture(b: &BindingRef) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        b.attach("probe", Rc::new(move |v| s.borrow_mut().push(v)))
            .unwrap();
        seen
    }

    #[test]
    fn unattached_binding_does_nothing() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        let b = Binding::element(&rt, &src, path(["text"]), BindingOptions::new());
        assert!(!b.exec());
    }

    #[test]
    fn pushes_and_follows_changes() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        src.set("text", "hi").unwrap();
        let b = Binding::element(&rt, &src, path(["text"]), BindingOptions::new().no_converter());
        let seen = capture(&b);
        assert!(b.exec());
        src.set("text", "ho").unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("hi"), Value::from("ho")]
        );
    }

    #[test]
    fn nested_chain_tracks_intermediate_objects() {
        let (rt, store) = setup();
        let root = node(&rt, &store);
        let mid = node(&rt, &store);
        let other = node(&rt, &store);
        mid.set("text", "first").unwrap();
        other.set("text", "second").unwrap();
        root.set("child", &mid).unwrap();

        let b = Binding::element(
            &rt,
            &root,
            path(["child", "text"]),
            BindingOptions::new().no_converter(),
        );
        let seen = capture(&b);
        assert!(b.exec());
        mid.set("text", "first!").unwrap();
        root.set("child", &other).unwrap();
        // The old intermediate is no longer on the chain.
        mid.set("text", "ignored").unwrap();
        other.set("text", "second!").unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                Value::from("first"),
                Value::from("first!"),
                Value::from("second"),
                Value::from("second!"),
            ]
        );
    }

    #[test]
    fn absent_segments_push_nothing() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        let b = Binding::element(
            &rt,
            &src,
            path(["data", "a", "b"]),
            BindingOptions::new().no_converter(),
        );
        let seen = capture(&b);
        assert!(!b.exec());
        src.set("data", Value::from_json(serde_json::json!({"a": {"b": 4}})))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(4)]);
    }

    #[test]
    fn unresolved_source_returns_false() {
        let (rt, _store) = setup();
        let b = Binding::element(&rt, ObjectKey::new("missing"), path(["text"]), BindingOptions::new());
        let seen = capture(&b);
        assert!(!b.exec());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn failed_conversion_is_not_pushed() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        src.set("text", "abc").unwrap();
        let b = Binding::element(
            &rt,
            &src,
            path(["text"]),
            BindingOptions::new().converter(ConverterKey::new("NumberConverter").unwrap()),
        );
        let seen = capture(&b);
        assert!(!b.exec());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn write_back_into_plain_data() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        src.set("data", Value::from_json(serde_json::json!({"a": [1, 2]})))
            .unwrap();
        let b = Binding::bidirectional(
            &rt,
            &src,
            vec!["data".into(), "a".into(), PathSegment::Index(1)],
            BindingOptions::new().no_converter(),
        );
        assert!(b.as_bidirectional().unwrap().update_source(&Value::from(9)));
        assert_eq!(
            src.get("data").unwrap().to_plain_json(),
            Some(serde_json::json!({"a": [1, 9]}))
        );
    }

    #[test]
    fn write_back_through_intermediate_object() {
        let (rt, store) = setup();
        let root = node(&rt, &store);
        let child = node(&rt, &store);
        root.set("child", &child).unwrap();
        let b = Binding::bidirectional(
            &rt,
            &root,
            path(["child", "count"]),
            BindingOptions::new().no_converter(),
        );
        assert!(b.as_bidirectional().unwrap().update_source(&Value::from(3)));
        assert_eq!(child.get("count"), Some(Value::from(3)));
    }

    #[test]
    fn write_back_refused_without_inverse() {
        let (rt, store) = setup();
        let src = node(&rt, &store);
        let b = Binding::bidirectional(
            &rt,
            &src,
            path(["count"]),
            BindingOptions::new()
                .converter(ConverterKey::new("BooleanConverter").unwrap())
                .parameter("1"),
        );
        assert!(!b.as_bidirectional().unwrap().update_source(&Value::from(true)));
        assert_eq!(src.get("count"), Some(Value::Null));
    }
}
