//! Property lifecycle: default / local / binding states and notification.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use bindery_core::{
    Binding, BindingError, BindingOptions, ObjectError, PropertyState, Value, path,
};
use common::{ChangeLog, Fixture};
use proptest::prelude::*;

#[test]
fn states_follow_default_local_binding() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let label = fx.create("Label");

    for key in ["text", "size", "data"] {
        assert_eq!(label.state(key), Some(PropertyState::Default), "{key}");
    }
    // Identity is assigned locally at construction.
    assert_eq!(label.state("id"), Some(PropertyState::Local));
    assert_eq!(label.state("key"), Some(PropertyState::Local));

    label.set("text", "hello").unwrap();
    assert_eq!(label.state("text"), Some(PropertyState::Local));

    let binding = Binding::element(&fx.rt, &source, path(["size"]), BindingOptions::new());
    label.bind("size", &binding).unwrap();
    assert_eq!(label.state("size"), Some(PropertyState::Binding));

    label.unset("text").unwrap();
    label.unset("size").unwrap();
    assert_eq!(label.state("text"), Some(PropertyState::Default));
    assert_eq!(label.state("size"), Some(PropertyState::Default));
    assert_eq!(label.get("text"), Some(Value::from("")));
    assert!(!binding.is_attached());
}

#[test]
fn unset_reruns_default_factories() {
    let fx = Fixture::new();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    bindery_core::TypeDeclaration::new("Counter")
        .property(
            bindery_core::PropertyDescriptor::new("items", bindery_core::TypeToken::Array)
                .default_factory(move |_| {
                    counter.set(counter.get() + 1);
                    Value::Array(Vec::new())
                }),
        )
        .declare(&fx.rt)
        .unwrap();
    let counter = fx.create("Counter");
    assert_eq!(calls.get(), 1);
    counter.unset("items").unwrap();
    counter.unset("items").unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn object_values_always_notify() {
    let fx = Fixture::new();
    let log = ChangeLog::attach(&fx.rt);
    let label = fx.create("Label");
    let data = Value::from(vec![Value::from(1)]);
    label.set("data", data.clone()).unwrap();
    label.set("data", data).unwrap();
    assert_eq!(log.count(&label, "data"), 2);

    label.notify("data").unwrap();
    assert_eq!(log.count(&label, "data"), 3);
}

#[test]
fn unknown_property_is_rejected() {
    let fx = Fixture::new();
    let label = fx.create("Label");
    let err = label.set("nope", 1).unwrap_err();
    assert_eq!(
        err,
        ObjectError::UnknownProperty {
            type_name: "Label".into(),
            key: "nope".into()
        }
    );
}

#[test]
fn reattaching_a_bound_binding_fails_without_side_effects() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    source.set("text", "from source").unwrap();
    let first = fx.create("Label");
    let second = fx.create("Label");
    second.set("text", "mine").unwrap();

    let binding = Binding::element(&fx.rt, &source, path(["text"]), BindingOptions::new());
    first.bind("text", &binding).unwrap();
    assert_eq!(first.get("text"), Some(Value::from("from source")));

    let err = second.bind("text", &binding).unwrap_err();
    assert_eq!(
        err,
        ObjectError::Binding(BindingError::AlreadyAttached {
            owner: format!("{}.text", first.label())
        })
    );
    assert_eq!(second.state("text"), Some(PropertyState::Local));
    assert_eq!(second.get("text"), Some(Value::from("mine")));
    assert!(second.binding("text").is_none());
}

#[test]
fn bidirectional_update_skips_echo() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    source.set("size", 5).unwrap();
    let input = fx.create("TextBox");
    let log = ChangeLog::attach(&fx.rt);

    let binding = Binding::bidirectional(
        &fx.rt,
        &source,
        path(["size"]),
        BindingOptions::new().no_converter(),
    );
    input.bind("value", &binding).unwrap();
    assert_eq!(input.get("value"), Some(Value::from(5)));
    let before = log.count(&source, "size");

    // Same value: the target does not change, so the source is not written.
    input.update("value", 5).unwrap();
    assert_eq!(log.count(&source, "size"), before);

    input.update("value", 6).unwrap();
    assert_eq!(log.count(&source, "size"), before + 1);
    assert_eq!(source.get("size"), Some(Value::from(6)));
    assert_eq!(input.state("value"), Some(PropertyState::Binding));
}

#[test]
fn update_without_bidirectional_binding_is_set() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let input = fx.create("TextBox");
    let binding = Binding::element(&fx.rt, &source, path(["text"]), BindingOptions::new());
    input.bind("value", &binding).unwrap();
    input.update("value", "typed").unwrap();
    assert_eq!(input.state("value"), Some(PropertyState::Local));
    assert!(!binding.is_attached());
    assert_eq!(source.get("text"), Some(Value::from("")));
}

#[test]
fn info_reports_descriptors_and_states() {
    let fx = Fixture::new();
    let input = fx.create("TextBox");
    input.set("text", "x").unwrap();
    let info = input.info();
    assert_eq!(info.type_name, "TextBox");
    assert!(info.properties["value"].descriptor.prefer_bidirectional);
    assert_eq!(info.properties["text"].state, PropertyState::Local);
    assert_eq!(info.properties["size"].state, PropertyState::Default);
    assert!(info.properties.contains_key("id"));
}

#[test]
fn dropping_the_target_detaches_its_bindings() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let binding = Binding::element(&fx.rt, &source, path(["text"]), BindingOptions::new());
    {
        let target = fx.create("Label");
        target.bind("text", &binding).unwrap();
        assert!(binding.is_attached());
    }
    assert!(!binding.is_attached());
    // Source changes after the drop reach nobody.
    source.set("text", "late").unwrap();
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn set_then_get_round_trips(value in scalar()) {
        let fx = Fixture::new();
        let label = fx.create("Label");
        label.set("data", value.clone()).unwrap();
        prop_assert_eq!(label.get("data"), Some(value));
        prop_assert_eq!(label.state("data"), Some(PropertyState::Local));
    }

    #[test]
    fn repeated_scalar_set_notifies_once(value in scalar()) {
        let fx = Fixture::new();
        let label = fx.create("Label");
        // Start from a value no generated scalar equals.
        label.set("data", Value::from(vec![Value::Null])).unwrap();
        let log = ChangeLog::attach(&fx.rt);
        label.set("data", value.clone()).unwrap();
        label.set("data", value).unwrap();
        prop_assert_eq!(log.count(&label, "data"), 1);
    }
}
