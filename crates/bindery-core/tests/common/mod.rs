//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use bindery_core::{
    ObjectRef, ObjectStore, PropertyChanged, PropertyDescriptor, Runtime, RuntimeConfig,
    Subscription, TypeDeclaration, TypeToken, Value,
};

pub struct Fixture {
    pub rt: Rc<Runtime>,
    pub store: Rc<ObjectStore>,
}

impl Fixture {
    /// A runtime with a store and the `Label` / `TextBox` / `Panel` types.
    pub fn new() -> Self {
        let rt = Runtime::new(RuntimeConfig::default());
        let store = rt.install_store();
        TypeDeclaration::new("Label")
            .property(PropertyDescriptor::new("text", TypeToken::String).default_value(""))
            .property(PropertyDescriptor::new("size", TypeToken::Number).default_value(12))
            .property(PropertyDescriptor::new("data", TypeToken::Any))
            .declare(&rt)
            .expect("declare Label");
        TypeDeclaration::new("TextBox")
            .extends("Label")
            .property(
                PropertyDescriptor::new("value", TypeToken::String)
                    .default_value("")
                    .prefer_bidirectional(),
            )
            .declare(&rt)
            .expect("declare TextBox");
        TypeDeclaration::new("Panel")
            .property(PropertyDescriptor::new("child", TypeToken::Any))
            .property(PropertyDescriptor::new("title", TypeToken::String).templated())
            .declare(&rt)
            .expect("declare Panel");
        Self { rt, store }
    }

    /// Create and register an instance.
    pub fn create(&self, type_name: &str) -> ObjectRef {
        let object = self.rt.create(type_name).expect("create");
        self.store.insert(&object);
        object
    }
}

/// Records every property change published on the bus.
pub struct ChangeLog {
    pub seen: Rc<RefCell<Vec<(String, String, Value)>>>,
    _sub: Subscription,
}

impl ChangeLog {
    pub fn attach(rt: &Runtime) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = rt
            .bus()
            .property_changed()
            .subscribe(move |msg: &PropertyChanged| {
                sink.borrow_mut().push((
                    msg.sender.label(),
                    msg.property.clone(),
                    msg.value.clone(),
                ));
            });
        Self { seen, _sub: sub }
    }

    /// Changes of one property on one object.
    pub fn count(&self, object: &ObjectRef, property: &str) -> usize {
        let label = object.label();
        self.seen
            .borrow()
            .iter()
            .filter(|(l, p, _)| *l == label && p == property)
            .count()
    }
}

/// Runs `f` with a subscriber that writes plain-text logs into a buffer.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || SharedWriter(Arc::clone(&sink)))
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let text = buffer
        .lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    (result, text)
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
