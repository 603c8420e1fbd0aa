//! Change propagation through element, bidirectional and multi bindings.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use bindery_core::{
    Binding, BindingOptions, Conversion, ConverterInfo, ConverterKey, PathSegment, TypeToken,
    Value, ValueConverter, path,
};
use common::{ChangeLog, Fixture, capture_logs};

fn key(name: &str) -> ConverterKey {
    ConverterKey::new(name).unwrap()
}

#[test]
fn default_converter_coerces_to_the_target_type() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let target = fx.create("Label");
    source.set("size", 14).unwrap();
    target
        .bind(
            "text",
            &Binding::element(&fx.rt, &source, path(["size"]), BindingOptions::new()),
        )
        .unwrap();
    assert_eq!(target.get("text"), Some(Value::from("14")));
    source.set("size", 15.5).unwrap();
    assert_eq!(target.get("text"), Some(Value::from("15.5")));
}

#[test]
fn multi_binding_pushes_once_per_exec() {
    let fx = Fixture::new();
    let a = fx.create("Label");
    let b = fx.create("Label");
    a.set("data", 3).unwrap();
    b.set("data", "x").unwrap();
    let target = fx.create("Label");

    let sources = vec![
        Binding::element(&fx.rt, &a, path(["data"]), BindingOptions::new()),
        Binding::element(&fx.rt, &b, path(["data"]), BindingOptions::new()),
    ];
    let multi = Binding::multi(&fx.rt, sources, BindingOptions::new().no_converter()).unwrap();
    let log = ChangeLog::attach(&fx.rt);
    target.bind("data", &multi).unwrap();

    assert_eq!(
        target.get("data"),
        Some(Value::Array(vec![Value::from(3), Value::from("x")]))
    );
    assert_eq!(log.count(&target, "data"), 1);

    // A single source change recombines immediately.
    b.set("data", "y").unwrap();
    assert_eq!(log.count(&target, "data"), 2);
    assert_eq!(
        target.get("data"),
        Some(Value::Array(vec![Value::from(3), Value::from("y")]))
    );
}

#[test]
fn multi_binding_formats_with_string_format() {
    let fx = Fixture::new();
    let first = fx.create("Label");
    let last = fx.create("Label");
    first.set("text", "Ada").unwrap();
    last.set("text", "Lovelace").unwrap();
    let target = fx.create("Label");
    let multi = Binding::multi(
        &fx.rt,
        vec![
            Binding::element(&fx.rt, &first, path(["text"]), BindingOptions::new()),
            Binding::element(&fx.rt, &last, path(["text"]), BindingOptions::new()),
        ],
        BindingOptions::new()
            .converter(key("StringFormatConverter"))
            .parameter("${1}, ${0}"),
    )
    .unwrap();
    target.bind("text", &multi).unwrap();
    assert_eq!(target.get("text"), Some(Value::from("Lovelace, Ada")));
}

#[test]
fn chain_follows_swapped_intermediates() {
    let fx = Fixture::new();
    let panel = fx.create("Panel");
    let old_child = fx.create("Label");
    let new_child = fx.create("Label");
    old_child.set("text", "old").unwrap();
    new_child.set("text", "new").unwrap();
    panel.set("child", &old_child).unwrap();

    let target = fx.create("Label");
    target
        .bind(
            "text",
            &Binding::element(&fx.rt, &panel, path(["child", "text"]), BindingOptions::new()),
        )
        .unwrap();
    assert_eq!(target.get("text"), Some(Value::from("old")));

    panel.set("child", &new_child).unwrap();
    assert_eq!(target.get("text"), Some(Value::from("new")));

    old_child.set("text", "stale").unwrap();
    assert_eq!(target.get("text"), Some(Value::from("new")));

    new_child.set("text", "fresh").unwrap();
    assert_eq!(target.get("text"), Some(Value::from("fresh")));
}

#[test]
fn array_paths_read_plain_data() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    source
        .set(
            "data",
            Value::from_json(serde_json::json!({"rows": [{"name": "a"}, {"name": "b"}]})),
        )
        .unwrap();
    let target = fx.create("Label");
    let segments = vec![
        PathSegment::from("data"),
        PathSegment::from("rows"),
        PathSegment::Index(1),
        PathSegment::from("name"),
    ];
    target
        .bind(
            "text",
            &Binding::element(&fx.rt, &source, segments, BindingOptions::new()),
        )
        .unwrap();
    assert_eq!(target.get("text"), Some(Value::from("b")));
}

#[test]
fn failed_conversions_are_logged_not_pushed() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let target = fx.create("Label");
    source.set("text", "12").unwrap();
    target
        .bind(
            "size",
            &Binding::element(
                &fx.rt,
                &source,
                path(["text"]),
                BindingOptions::new().converter(key("NumberConverter")),
            ),
        )
        .unwrap();
    assert_eq!(target.get("size"), Some(Value::from(12)));

    let ((), logs) = capture_logs(|| source.set("text", "twelve").unwrap());
    assert_eq!(target.get("size"), Some(Value::from(12)));
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("conversion failed"), "{logs}");
}

#[test]
fn invalid_parameters_are_logged_distinctly() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let target = fx.create("Label");
    source.set("size", 3.14159).unwrap();
    let binding = Binding::element(
        &fx.rt,
        &source,
        path(["size"]),
        BindingOptions::new()
            .converter(key("DecimalPrecision"))
            .parameter("two"),
    );
    let (result, logs) = capture_logs(|| target.bind("text", &binding));
    result.unwrap();
    assert_eq!(target.get("text"), Some(Value::from("")));
    assert!(logs.contains("invalid converter parameter"), "{logs}");
}

#[test]
fn write_back_without_inverse_is_an_error_log() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    let input = fx.create("TextBox");
    source.set("text", "on").unwrap();
    let binding = Binding::bidirectional(
        &fx.rt,
        &source,
        path(["text"]),
        BindingOptions::new()
            .converter(key("BooleanConverter"))
            .parameter("on"),
    );
    input.bind("value", &binding).unwrap();
    assert_eq!(input.get("value"), Some(Value::from(true)));

    let (result, logs) = capture_logs(|| input.update("value", false));
    result.unwrap();
    assert_eq!(source.get("text"), Some(Value::from("on")));
    assert!(logs.contains("ERROR"), "{logs}");
    assert!(logs.contains("converter has no inverse"), "{logs}");
}

#[test]
fn write_back_into_nested_plain_data_notifies_owner() {
    let fx = Fixture::new();
    let source = fx.create("Label");
    source
        .set("data", Value::from_json(serde_json::json!({"form": {"name": "a"}})))
        .unwrap();
    let input = fx.create("TextBox");
    let log = ChangeLog::attach(&fx.rt);
    input
        .bind(
            "value",
            &Binding::bidirectional(
                &fx.rt,
                &source,
                path(["data", "form", "name"]),
                BindingOptions::new(),
            ),
        )
        .unwrap();
    input.update("value", "b").unwrap();
    assert_eq!(
        source.get("data").and_then(|v| v.to_plain_json()),
        Some(serde_json::json!({"form": {"name": "b"}}))
    );
    assert_eq!(log.count(&source, "data"), 1);
}

/// Bind a `TextBox` value two-way to `segments` under a `Label` whose
/// `data` holds `data`, then type `typed` into it.
fn write_back_into(
    data: serde_json::Value,
    segments: Vec<PathSegment>,
    typed: &str,
) -> (serde_json::Value, usize, String) {
    let fx = Fixture::new();
    let source = fx.create("Label");
    source.set("data", Value::from_json(data)).unwrap();
    let input = fx.create("TextBox");
    let log = ChangeLog::attach(&fx.rt);
    input
        .bind(
            "value",
            &Binding::bidirectional(&fx.rt, &source, segments, BindingOptions::new()),
        )
        .unwrap();
    let ((), logs) = capture_logs(|| input.update("value", typed).unwrap());
    let data = source
        .get("data")
        .and_then(|v| v.to_plain_json())
        .unwrap();
    (data, log.count(&source, "data"), logs)
}

fn rows(index: usize) -> Vec<PathSegment> {
    vec![
        PathSegment::from("data"),
        PathSegment::from("rows"),
        PathSegment::Index(index),
    ]
}

#[test]
fn write_back_past_the_array_end_pads_with_null() {
    let (data, changes, _) = write_back_into(serde_json::json!({"rows": [1]}), rows(3), "x");
    assert_eq!(data, serde_json::json!({"rows": [1, null, null, "x"]}));
    assert_eq!(changes, 1);
}

#[test]
fn write_back_creates_a_missing_map_key() {
    let (data, changes, _) = write_back_into(
        serde_json::json!({"form": {"name": "a"}}),
        path(["data", "form", "email"]),
        "a@b.c",
    );
    assert_eq!(
        data,
        serde_json::json!({"form": {"name": "a", "email": "a@b.c"}})
    );
    assert_eq!(changes, 1);
}

#[test]
fn write_back_with_a_key_on_an_array_is_refused() {
    let (data, changes, logs) = write_back_into(
        serde_json::json!({"rows": [1, 2]}),
        path(["data", "rows", "name"]),
        "x",
    );
    assert_eq!(data, serde_json::json!({"rows": [1, 2]}));
    assert_eq!(changes, 0);
    assert!(logs.contains("does not fit the source data"), "{logs}");
}

#[test]
fn write_back_to_an_unreachable_index_is_refused() {
    let (data, changes, logs) =
        write_back_into(serde_json::json!({"rows": [1, 2]}), rows(usize::MAX), "x");
    assert_eq!(data, serde_json::json!({"rows": [1, 2]}));
    assert_eq!(changes, 0);
    assert!(logs.contains("does not fit the source data"), "{logs}");

    let beyond = 2 + bindery_core::value::MAX_ARRAY_PADDING;
    let (data, changes, _) = write_back_into(serde_json::json!({"rows": [1, 2]}), rows(beyond), "x");
    assert_eq!(data, serde_json::json!({"rows": [1, 2]}));
    assert_eq!(changes, 0);
}

#[test]
fn unresolved_sources_produce_no_value() {
    let fx = Fixture::new();
    let target = fx.create("Label");
    target.set("text", "kept").unwrap();
    let binding = Binding::element(
        &fx.rt,
        bindery_core::ObjectKey::new("missing"),
        path(["text"]),
        BindingOptions::new(),
    );
    let (result, logs) = capture_logs(|| target.bind("text", &binding));
    result.unwrap();
    assert_eq!(target.get("text"), Some(Value::from("kept")));
    assert!(logs.contains("binding source not resolved"), "{logs}");
}

/// Upper-cases strings; registered by the host.
struct Shout;

impl ValueConverter for Shout {
    fn info(&self) -> ConverterInfo {
        ConverterInfo::new("upper case", TypeToken::String, TypeToken::String)
    }

    fn convert(&self, value: &Value, _: Option<&str>, _: Option<&TypeToken>) -> Conversion {
        match value {
            Value::String(s) => Conversion::Value(Value::from(s.to_uppercase())),
            _ => Conversion::Failed,
        }
    }
}

#[test]
fn host_converters_participate() {
    let fx = Fixture::new();
    fx.rt.register_converter("Shout", Shout).unwrap();
    assert!(fx.rt.register_converter("Shout", Shout).is_err());

    let source = fx.create("Label");
    let target = fx.create("Label");
    let pushed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&pushed);
    let binding = Binding::element(
        &fx.rt,
        &source,
        path(["text"]),
        BindingOptions::new().converter(key("Shout")),
    );
    target.bind("text", &binding).unwrap();
    let _sub = fx
        .rt
        .bus()
        .property_changed()
        .subscribe(move |msg| sink.borrow_mut().push(msg.value.clone()));
    source.set("text", "hey").unwrap();
    assert_eq!(target.get("text"), Some(Value::from("HEY")));
    let pushed = pushed.borrow();
    assert_eq!(pushed.len(), 2);
    assert!(pushed.contains(&Value::from("hey")));
    assert!(pushed.contains(&Value::from("HEY")));
}
