#![forbid(unsafe_code)]

//! Reusable fragments whose bindings are resolved at load time.
//!
//! A [`Template`] holds the serialized form of an object graph in which some
//! properties are bound with template bindings (a relative path, no source).
//! Loading it rewrites every template binding node into a concrete element
//! binding rooted at the supplied source, with the supplied base path
//! prefixed to its own, then deserializes the result as a new instance.
//!
//! ```text
//!   {"__type__": "ElementBindingTemplate", "path": ["a"]}
//!     + source K, base ["form", "field1"]
//!   {"__type__": "ElementBinding", "sourceKey": "K", "path": ["form", "field1", "a"]}
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::binding::BindingKind;
use crate::error::{RegistryError, SerializeError};
use crate::object::{ObjectKey, ObjectRef};
use crate::runtime::Runtime;
use crate::serialize::{self, JsonMap, SerializeContext, TYPE_FIELD, tagged};
use crate::value::PathSegment;

/// Where compiled bindings point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderContext {
    pub source: ObjectKey,
    pub source_property: Vec<PathSegment>,
}

/// Rewrites one tagged node. Receives the node with its tag still present.
pub type LoaderFn = Rc<dyn Fn(JsonMap, &LoaderContext) -> Json>;

/// Loader table keyed by the tag of the nodes it rewrites.
#[derive(Default)]
pub struct TemplateLoaders {
    loaders: RefCell<BTreeMap<String, LoaderFn>>,
}

impl TemplateLoaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader. Fails if the tag already has one.
    pub fn register(
        &self,
        tag: impl Into<String>,
        loader: impl Fn(JsonMap, &LoaderContext) -> Json + 'static,
    ) -> Result<(), RegistryError> {
        let tag = tag.into();
        let mut loaders = self.loaders.borrow_mut();
        if loaders.contains_key(&tag) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        loaders.insert(tag, Rc::new(loader));
        Ok(())
    }

    /// Loaders for the two binding template tags.
    pub(crate) fn register_builtin(&self) {
        for (template, concrete) in [
            (BindingKind::ElementTemplate, BindingKind::Element),
            (
                BindingKind::BidirectionalElementTemplate,
                BindingKind::BidirectionalElement,
            ),
        ] {
            let mut loaders = self.loaders.borrow_mut();
            loaders
                .entry(template.tag().to_owned())
                .or_insert_with(|| Rc::new(move |node, ctx| compile_binding(concrete, node, ctx)));
        }
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<LoaderFn> {
        self.loaders.borrow().get(tag).cloned()
    }

    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.loaders.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for TemplateLoaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateLoaders")
            .field("tags", &self.tags())
            .finish()
    }
}

fn segment_json(segment: &PathSegment) -> Json {
    match segment {
        PathSegment::Key(k) => Json::String(k.clone()),
        PathSegment::Index(i) => Json::from(*i),
    }
}

/// Re-tag a template binding node as `concrete`, rooted at the context.
fn compile_binding(concrete: BindingKind, mut node: JsonMap, ctx: &LoaderContext) -> Json {
    let relative = match node.remove("path") {
        Some(Json::Array(items)) => items,
        _ => Vec::new(),
    };
    let path: Vec<Json> = ctx
        .source_property
        .iter()
        .map(segment_json)
        .chain(relative)
        .collect();
    node.insert("path".to_owned(), Json::Array(path));
    node.insert(
        "sourceKey".to_owned(),
        Json::String(ctx.source.as_str().to_owned()),
    );
    tagged(concrete.tag(), node)
}

/// Rewrite every node with a registered loader; everything else is copied.
#[must_use]
pub fn compile_template(loaders: &TemplateLoaders, template: &Json, ctx: &LoaderContext) -> Json {
    match template {
        Json::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| compile_template(loaders, item, ctx))
                .collect(),
        ),
        Json::Object(map) => {
            let loader = map
                .get(TYPE_FIELD)
                .and_then(Json::as_str)
                .and_then(|tag| loaders.get(tag));
            match loader {
                Some(loader) => loader(map.clone(), ctx),
                None => Json::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), compile_template(loaders, v, ctx)))
                        .collect(),
                ),
            }
        }
        other => other.clone(),
    }
}

/// Source and base path for [`Template::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub source: ObjectKey,
    pub source_property: Vec<PathSegment>,
}

impl LoadOptions {
    pub fn new(source: impl Into<ObjectKey>, source_property: Vec<PathSegment>) -> Self {
        Self {
            source: source.into(),
            source_property,
        }
    }
}

/// A captured, serialized object graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    json: Json,
}

impl Template {
    /// Capture `root` as it is now.
    pub fn new(root: &ObjectRef) -> Result<Self, SerializeError> {
        Ok(Self {
            json: serialize::serialize(root, &SerializeContext::new())?,
        })
    }

    /// Wrap an already serialized fragment.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        Self { json }
    }

    #[must_use]
    pub fn json(&self) -> &Json {
        &self.json
    }

    /// The fragment with every template binding resolved against `options`.
    #[must_use]
    pub fn compile(&self, runtime: &Runtime, options: &LoadOptions) -> Json {
        let ctx = LoaderContext {
            source: options.source.clone(),
            source_property: options.source_property.clone(),
        };
        compile_template(runtime.loaders(), &self.json, &ctx)
    }

    /// Compile and instantiate with fresh ids and keys.
    pub fn load(
        &self,
        runtime: &Rc<Runtime>,
        options: &LoadOptions,
    ) -> Result<ObjectRef, SerializeError> {
        let compiled = self.compile(runtime, options);
        let value = serialize::deserialize(runtime, compiled, SerializeContext::new().new_instance())?
            .into_value()?;
        match value.as_object() {
            Some(object) => Ok(Rc::clone(object)),
            None => Err(SerializeError::UnexpectedShape {
                expected: "bindable object",
                found: value.type_token().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;
    use crate::value::path;
    use serde_json::json;

    fn ctx() -> LoaderContext {
        LoaderContext {
            source: ObjectKey::new("K"),
            source_property: path(["form", "field1"]),
        }
    }

    #[test]
    fn template_node_becomes_element_binding() {
        let rt = Runtime::new(RuntimeConfig::default());
        let compiled = compile_template(
            rt.loaders(),
            &json!({"__type__": "ElementBindingTemplate", "path": ["a"], "converter": null}),
            &ctx(),
        );
        assert_eq!(
            compiled,
            json!({
                "__type__": "ElementBinding",
                "sourceKey": "K",
                "path": ["form", "field1", "a"],
                "converter": null
            })
        );
    }

    #[test]
    fn nested_nodes_are_compiled_and_others_copied() {
        let rt = Runtime::new(RuntimeConfig::default());
        let compiled = compile_template(
            rt.loaders(),
            &json!({
                "__type__": "Label",
                "text": "x",
                "bindings": {
                    "__type__": "BindingsRecord",
                    "text": {"__type__": "BidirectionalElementBindingTemplate", "path": [0]}
                },
                "list": [1, {"__type__": "ElementBindingTemplate"}]
            }),
            &ctx(),
        );
        assert_eq!(compiled["__type__"], json!("Label"));
        assert_eq!(compiled["text"], json!("x"));
        assert_eq!(
            compiled["bindings"]["text"],
            json!({
                "__type__": "BidirectionalElementBinding",
                "sourceKey": "K",
                "path": ["form", "field1", 0]
            })
        );
        assert_eq!(compiled["list"][1]["path"], json!(["form", "field1"]));
    }

    #[test]
    fn duplicate_loader_fails() {
        let rt = Runtime::new(RuntimeConfig::default());
        let err = rt
            .loaders()
            .register("ElementBindingTemplate", |node, _| Json::Object(node))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTag("ElementBindingTemplate".into()));
        rt.loaders()
            .register("Custom", |_, ctx| Json::String(ctx.source.to_string()))
            .unwrap();
        assert_eq!(
            compile_template(rt.loaders(), &json!([{"__type__": "Custom"}]), &ctx()),
            json!(["K"])
        );
    }
}
